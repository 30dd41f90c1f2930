//! The placement/coalesce engine: first-fit allocation with in-place
//! splitting, neighbor-merge coalescing on release, and page-boundary
//! reclamation.
//!
//! This is the part of the crate that earns its keep; everything else
//! (`align`, `block`, `page`) exists to support it.

use std::ptr;

use crate::align::ALIGNMENT;
use crate::block::{BlockHeader, HEADER_SIZE};
use crate::page::{MmapSource, PageSource};
use crate::round_up;

/// A heap backed by `P`, threading every live and free block through a
/// doubly-linked registry in address order.
///
/// `Heap` owns its registry's head/tail directly rather than stashing them
/// in module statics, so a caller who needs more than one independent heap
/// (or wants to swap the page source under test) just makes more values.
/// The type holds raw pointers and is therefore neither `Send` nor `Sync`;
/// this crate makes no attempt at concurrent-safety (see the crate-level
/// docs), and the type system should say so rather than leave it to the
/// caller to find out the hard way.
pub struct Heap<P: PageSource = MmapSource> {
  head: *mut BlockHeader,
  tail: *mut BlockHeader,
  pages: P,
}

impl Heap<MmapSource> {
  /// A heap backed by real anonymous `mmap`/`munmap` calls.
  pub fn new() -> Self {
    Self::with_page_source(MmapSource)
  }
}

impl Default for Heap<MmapSource> {
  fn default() -> Self {
    Self::new()
  }
}

impl<P: PageSource> Heap<P> {
  /// A heap backed by an arbitrary [`PageSource`] - the seam tests use to
  /// substitute [`crate::page::FakePageSource`].
  pub fn with_page_source(pages: P) -> Self {
    Self {
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
      pages,
    }
  }

  /// Allocates `size` bytes, aligned to [`ALIGNMENT`]. Returns null if
  /// `size` is zero.
  ///
  /// # Safety
  ///
  /// The returned pointer (if non-null) must only be passed to
  /// [`Self::realloc`], [`Self::reallocarray`] or [`Self::free`] on this
  /// same `Heap`, and at most once to `free` (directly or via a
  /// non-in-place `realloc`/`reallocarray`).
  pub unsafe fn malloc(&mut self, size: usize) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    unsafe { self.place(size, false) }
  }

  /// Allocates space for `count` elements of `size` bytes, zero-filled.
  /// Returns null if either argument is zero, or if `count * size`
  /// overflows `usize` (the source this crate is grounded on does not
  /// check for that overflow; this port does, and fails safe instead).
  ///
  /// # Safety
  ///
  /// Same contract as [`Self::malloc`].
  pub unsafe fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
    if count == 0 || size == 0 {
      return ptr::null_mut();
    }

    let Some(total) = count.checked_mul(size) else {
      return ptr::null_mut();
    };

    unsafe { self.place(total, true) }
  }

  /// Resizes the block behind `ptr` to `new_size` bytes, preserving the
  /// leading `min(new_size, old requested size)` bytes. `ptr == null` acts
  /// like [`Self::malloc`]; `new_size == 0` with non-null `ptr` acts like
  /// [`Self::free`] and returns null.
  ///
  /// Growth past the block's current capacity allocates fresh, copies, and
  /// frees the old block; the bytes between the old and new requested size
  /// are *not* zeroed in that case (use [`Self::reallocarray`] if that
  /// matters to the caller).
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer this `Heap` previously returned and
  /// has not yet freed. The returned pointer supersedes `ptr`, which must
  /// not be used again.
  pub unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
    if ptr.is_null() {
      return unsafe { self.malloc(new_size) };
    }
    if new_size == 0 {
      unsafe { self.free(ptr) };
      return ptr::null_mut();
    }

    let header = unsafe { BlockHeader::from_payload(ptr) };
    let capacity = unsafe { (*header).total_size } - HEADER_SIZE;

    if new_size <= capacity {
      unsafe { (*header).requested_size = new_size };
      return ptr;
    }

    let old_requested = unsafe { (*header).requested_size };
    let new_ptr = unsafe { self.malloc(new_size) };

    unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, old_requested) };
    unsafe { self.free(ptr) };
    new_ptr
  }

  /// As [`Self::realloc`] with size computed as `count * size`, except
  /// newly exposed bytes (both on in-place growth and on the copied
  /// prefix of a fresh allocation) are zeroed.
  ///
  /// # Safety
  ///
  /// Same contract as [`Self::realloc`].
  pub unsafe fn reallocarray(&mut self, ptr: *mut u8, count: usize, size: usize) -> *mut u8 {
    if ptr.is_null() {
      return unsafe { self.calloc(count, size) };
    }
    if count == 0 || size == 0 {
      unsafe { self.free(ptr) };
      return ptr::null_mut();
    }

    let Some(new_size) = count.checked_mul(size) else {
      return ptr::null_mut();
    };

    let header = unsafe { BlockHeader::from_payload(ptr) };
    let capacity = unsafe { (*header).total_size } - HEADER_SIZE;

    if new_size <= capacity {
      let old_requested = unsafe { (*header).requested_size };
      if old_requested < new_size {
        unsafe { ptr::write_bytes(ptr.add(old_requested), 0, new_size - old_requested) };
      }
      unsafe { (*header).requested_size = new_size };
      return ptr;
    }

    let old_requested = unsafe { (*header).requested_size };
    let new_ptr = unsafe { self.calloc(count, size) };

    unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, old_requested) };
    unsafe { self.free(ptr) };
    new_ptr
  }

  /// Releases the block behind `ptr` back to the heap, merging with an
  /// eligible predecessor and returning whole idle pages to the OS. A
  /// null `ptr` is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer this `Heap` previously returned and
  /// has not yet freed. Double-free and use-after-free are caller contract
  /// violations this crate does not defend against.
  pub unsafe fn free(&mut self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }

    let block = unsafe { BlockHeader::from_payload(ptr) };
    unsafe { self.free_block(block) };
  }

  /// First-fit placement with in-place splitting (spec §4.1/§4.2). Shared
  /// by `malloc` and `calloc`; `zero` controls whether a reused or
  /// split-off payload is cleared before being handed back. A freshly
  /// mapped payload is never cleared here, since an anonymous mapping is
  /// already zero-filled by the OS.
  unsafe fn place(&mut self, size: usize, zero: bool) -> *mut u8 {
    let page_size = self.pages.page_size();

    if self.head.is_null() {
      let mapping_size = round_up!(HEADER_SIZE + size, page_size);
      let block = unsafe { self.reserve_mapping(mapping_size) };

      unsafe {
        (*block).mapping_origin = block;
        (*block).prev = ptr::null_mut();
        (*block).next = ptr::null_mut();
        (*block).requested_size = size;
        (*block).total_size = mapping_size;
      }
      self.head = block;
      self.tail = block;

      return BlockHeader::payload(block);
    }

    let mut current = self.head;
    while !current.is_null() {
      unsafe {
        if BlockHeader::is_free(current) && (*current).total_size >= HEADER_SIZE + size {
          (*current).requested_size = size;
          let payload = BlockHeader::payload(current);
          if zero {
            ptr::write_bytes(payload, 0, size);
          }
          return payload;
        }

        let used = round_up!(HEADER_SIZE + (*current).requested_size, ALIGNMENT);
        if (*current).total_size >= used + HEADER_SIZE + size {
          let candidate = (current as *mut u8).add(used) as *mut BlockHeader;

          if (candidate as usize) % page_size >= HEADER_SIZE {
            let old_next = (*current).next;

            (*candidate).prev = current;
            (*candidate).next = old_next;
            if self.tail == current {
              self.tail = candidate;
            } else {
              (*old_next).prev = candidate;
            }
            (*current).next = candidate;

            (*candidate).mapping_origin = (*current).mapping_origin;
            (*candidate).requested_size = size;
            (*candidate).total_size = (*current).total_size - used;
            (*current).total_size = used;

            let payload = BlockHeader::payload(candidate);
            if zero {
              ptr::write_bytes(payload, 0, size);
            }
            return payload;
          }
          // I5 would be violated by this split; keep scanning rather
          // than shifting it.
        }

        current = (*current).next;
      }
    }

    let mapping_size = round_up!(HEADER_SIZE + size, page_size);
    let block = unsafe { self.reserve_mapping(mapping_size) };

    unsafe {
      (*block).mapping_origin = block;
      (*block).prev = self.tail;
      (*block).next = ptr::null_mut();
      (*block).requested_size = size;
      (*block).total_size = mapping_size;
      (*self.tail).next = block;
    }
    self.tail = block;

    BlockHeader::payload(block)
  }

  /// Reserves a fresh mapping of `size` bytes. The source this crate is
  /// grounded on propagates `mmap` failure as raw undefined behavior
  /// (spec §7); this port panics instead, since a caller can recover from
  /// neither, and a clean abort is strictly better than the alternative.
  unsafe fn reserve_mapping(&self, size: usize) -> *mut BlockHeader {
    let addr = unsafe { self.pages.reserve(size) };
    if addr.is_null() {
      log::error!("page reservation of {size} bytes failed");
      panic!("mmalloc: failed to reserve {size} bytes from the OS");
    }
    addr as *mut BlockHeader
  }

  /// Release step 1 (spec §4.5): neighbor merge.
  unsafe fn free_block(&mut self, block: *mut BlockHeader) {
    let mut surviving = block;
    let prev = unsafe { (*block).prev };
    let next = unsafe { (*block).next };

    if prev.is_null() {
      if next.is_null() {
        let origin = unsafe { (*block).mapping_origin };
        let total = unsafe { (*block).total_size };

        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        unsafe { self.pages.release(origin as *mut u8, total) };
        return;
      }

      unsafe { (*block).requested_size = 0 };
    } else if unsafe { (*prev).mapping_origin == (*block).mapping_origin } {
      unsafe {
        (*prev).total_size += (*block).total_size;
        (*prev).next = next;
      }
      if next.is_null() {
        self.tail = prev;
      } else {
        unsafe { (*next).prev = prev };
      }
      surviving = prev;
    } else {
      unsafe { (*block).requested_size = 0 };
    }

    unsafe { self.reclaim(surviving) };
  }

  /// Release step 2 (spec §4.5): page-boundary reclamation. `block` is
  /// the survivor of step 1; we only ever act on `block`'s mapping
  /// origin, never `block` itself when the two differ.
  unsafe fn reclaim(&mut self, block: *mut BlockHeader) {
    let origin = unsafe { (*block).mapping_origin };
    let page_size = self.pages.page_size();

    let eligible = unsafe { BlockHeader::is_free(origin) && (*origin).total_size >= page_size };
    if !eligible {
      return;
    }

    let total = unsafe { (*origin).total_size };

    if total % page_size == 0 {
      let prev = unsafe { (*origin).prev };
      let next = unsafe { (*origin).next };

      if prev.is_null() {
        self.head = next;
      } else {
        unsafe { (*prev).next = next };
      }
      if next.is_null() {
        self.tail = prev;
      } else {
        unsafe { (*next).prev = prev };
      }

      unsafe { self.pages.release(origin as *mut u8, total) };
      return;
    }

    // A non-integral tail remains. Carve a free block at the whole-page
    // boundary to own it, and re-point every sibling that still claims
    // `origin` as its mapping origin (the munmap argument moves with it).
    let whole_pages = (total / page_size) * page_size;
    let carved = unsafe { (origin as *mut u8).add(whole_pages) as *mut BlockHeader };

    let prev = unsafe { (*origin).prev };
    let next = unsafe { (*origin).next };

    unsafe {
      (*carved).prev = prev;
      (*carved).next = next;
      (*carved).requested_size = 0;
      (*carved).total_size = total - whole_pages;
      (*carved).mapping_origin = origin;
    }

    let mut walker = carved;
    while !walker.is_null() && unsafe { (*walker).mapping_origin } == origin {
      unsafe { (*walker).mapping_origin = carved };
      walker = unsafe { (*walker).next };
    }

    if prev.is_null() {
      self.head = carved;
    } else {
      unsafe { (*prev).next = carved };
    }
    if next.is_null() {
      self.tail = carved;
    } else {
      unsafe { (*next).prev = carved };
    }

    unsafe { self.pages.release(origin as *mut u8, whole_pages) };
  }

  /// Walks the registry head to tail and returns a snapshot of every
  /// block's bookkeeping fields, addresses included. Exists for tests and
  /// tooling that need to check registry-wide invariants from outside this
  /// module; production code has no use for it.
  pub fn debug_blocks(&self) -> Vec<BlockSnapshot> {
    let mut blocks = Vec::new();
    let mut current = self.head;

    while !current.is_null() {
      unsafe {
        blocks.push(BlockSnapshot {
          header: current as usize,
          mapping_origin: (*current).mapping_origin as usize,
          prev: (*current).prev as usize,
          next: (*current).next as usize,
          requested_size: (*current).requested_size,
          total_size: (*current).total_size,
        });
        current = (*current).next;
      }
    }

    blocks
  }

  /// The page granularity this heap's [`PageSource`] reports.
  pub fn page_size(&self) -> usize {
    self.pages.page_size()
  }
}

/// A plain-data copy of one [`BlockHeader`]'s fields, addresses included,
/// taken by [`Heap::debug_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSnapshot {
  pub header: usize,
  pub mapping_origin: usize,
  pub prev: usize,
  pub next: usize,
  pub requested_size: usize,
  pub total_size: usize,
}
