//! The OS page-mapper capability.
//!
//! [`Heap`](crate::heap::Heap) never calls `mmap`/`munmap` directly; it goes
//! through this trait instead, so tests can substitute a deterministic
//! bump-arena fake for the real syscalls (spec's re-architecture guidance:
//! "abstract the page mapper behind a two-method capability").

use std::cell::Cell;
use std::ffi::c_void;
use std::ptr;
use std::sync::OnceLock;

/// A source of whole pages: reserve a zero-filled range, release one back.
///
/// Implementations are not required to be `Sync`; the allocator that sits on
/// top of a `PageSource` is itself single-mutator (spec §5), so there is no
/// reason to ask a page source to be thread-safe either.
pub trait PageSource {
  /// The mapping granularity. All `reserve`/`release` sizes are multiples
  /// of this value.
  fn page_size(&self) -> usize;

  /// Reserves `size` contiguous, zero-filled, read/write bytes. `size` must
  /// already be a multiple of [`Self::page_size`]. Returns null on failure.
  ///
  /// # Safety
  ///
  /// `size` must be nonzero and a multiple of the page size.
  unsafe fn reserve(&self, size: usize) -> *mut u8;

  /// Releases `size` bytes starting at `base`, previously obtained from
  /// [`Self::reserve`] (or a prefix of such a range, so long as `size` is
  /// still a whole multiple of the page size).
  ///
  /// # Safety
  ///
  /// `base`/`size` must describe a range this source actually backs, and
  /// the caller must not touch that range again afterwards.
  unsafe fn release(&self, base: *mut u8, size: usize);
}

/// Production [`PageSource`] backed by anonymous `mmap`/`munmap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapSource;

fn system_page_size() -> usize {
  static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

  *PAGE_SIZE.get_or_init(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
      panic!("unable to determine the system page size");
    }
    size as usize
  })
}

impl PageSource for MmapSource {
  fn page_size(&self) -> usize {
    system_page_size()
  }

  unsafe fn reserve(&self, size: usize) -> *mut u8 {
    debug_assert!(size > 0 && size % self.page_size() == 0);

    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      log::error!("mmap({size}) failed: errno={}", std::io::Error::last_os_error());
      return ptr::null_mut();
    }

    log::trace!("reserved {size} bytes at {addr:p}");
    addr as *mut u8
  }

  unsafe fn release(&self, base: *mut u8, size: usize) {
    debug_assert!(size % self.page_size() == 0);

    if size == 0 {
      return;
    }

    let ret = unsafe { libc::munmap(base as *mut c_void, size) };
    if ret != 0 {
      log::error!(
        "munmap({base:p}, {size}) failed: errno={}",
        std::io::Error::last_os_error()
      );
    } else {
      log::trace!("released {size} bytes at {base:p}");
    }
  }
}

/// A deterministic bump-arena [`PageSource`] for tests: hands out
/// monotonically increasing, zero-filled slices of a preallocated buffer and
/// never reuses released ranges. Good enough to exercise the registry's
/// bookkeeping without touching real OS mappings.
pub struct FakePageSource {
  page_size: usize,
  buffer: Box<[u8]>,
  offset: Cell<usize>,
  released: std::cell::RefCell<Vec<(usize, usize)>>,
}

impl FakePageSource {
  /// Creates a fake source with the given page granularity and total
  /// capacity (in bytes, must be a multiple of `page_size`).
  pub fn new(page_size: usize, capacity: usize) -> Self {
    assert!(page_size.is_power_of_two());
    assert_eq!(capacity % page_size, 0);

    Self {
      page_size,
      buffer: vec![0u8; capacity].into_boxed_slice(),
      offset: Cell::new(0),
      released: std::cell::RefCell::new(Vec::new()),
    }
  }

  /// Base address of the backing buffer, for translating test pointers
  /// into offsets.
  pub fn base(&self) -> *const u8 {
    self.buffer.as_ptr()
  }

  /// The `(offset, size)` pairs passed to [`PageSource::release`] so far,
  /// in call order.
  pub fn released(&self) -> Vec<(usize, usize)> {
    self.released.borrow().clone()
  }
}

impl PageSource for FakePageSource {
  fn page_size(&self) -> usize {
    self.page_size
  }

  unsafe fn reserve(&self, size: usize) -> *mut u8 {
    debug_assert!(size > 0 && size % self.page_size == 0);

    let start = self.offset.get();
    let end = start + size;
    if end > self.buffer.len() {
      return ptr::null_mut();
    }
    self.offset.set(end);

    // SAFETY: `start..end` is within `self.buffer` and not handed out
    // again, since `offset` only moves forward.
    unsafe { self.buffer.as_ptr().add(start) as *mut u8 }
  }

  unsafe fn release(&self, base: *mut u8, size: usize) {
    // Bump arena: released ranges are never reused within a test, but we
    // do record the call so tests can assert the allocator released the
    // right range at the right time.
    let offset = base as usize - self.buffer.as_ptr() as usize;
    self.released.borrow_mut().push((offset, size));
  }
}
