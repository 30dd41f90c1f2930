//! The in-band block header and the layout helpers built on top of it.

use std::mem;

use static_assertions::const_assert_eq;

use crate::align::ALIGNMENT;

/// The fixed-size, in-band metadata record that precedes every block's
/// payload. Sits at the block's header address; the payload begins exactly
/// [`HEADER_SIZE`] bytes later.
///
/// Free blocks carry `requested_size == 0` (I4); every other field stays
/// populated so the registry can still be walked and coalesced.
#[repr(C)]
pub struct BlockHeader {
  /// Header address of the first block of the OS mapping this block lives
  /// in. Equal to `self` iff this block is a mapping origin (I6).
  pub mapping_origin: *mut BlockHeader,
  pub prev: *mut BlockHeader,
  pub next: *mut BlockHeader,
  /// Exact payload bytes the caller asked for; zero iff the block is free.
  pub requested_size: usize,
  /// Bytes this block occupies, header included, up to the next block's
  /// header or the end of its mapping.
  pub total_size: usize,
}

/// Size of [`BlockHeader`], in bytes. A multiple of [`ALIGNMENT`] (I1), so a
/// payload placed immediately after a header is itself aligned.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const_assert_eq!(HEADER_SIZE % ALIGNMENT, 0);

impl BlockHeader {
  /// Address of the payload this header guards.
  #[inline]
  pub fn payload(this: *mut BlockHeader) -> *mut u8 {
    unsafe { (this as *mut u8).add(HEADER_SIZE) }
  }

  /// Recovers the header address from a payload pointer previously handed
  /// out by [`Self::payload`].
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by this allocator and not yet freed.
  #[inline]
  pub unsafe fn from_payload(payload: *mut u8) -> *mut BlockHeader {
    unsafe { payload.sub(HEADER_SIZE) as *mut BlockHeader }
  }

  /// A block is free iff its requested size is zero (I4).
  #[inline]
  pub unsafe fn is_free(this: *mut BlockHeader) -> bool {
    unsafe { (*this).requested_size == 0 }
  }

  /// `true` iff `this` is the origin of its own mapping (I6).
  #[inline]
  pub unsafe fn is_mapping_origin(this: *mut BlockHeader) -> bool {
    unsafe { (*this).mapping_origin == this }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_size_is_alignment_multiple() {
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
  }

  #[test]
  fn payload_round_trips_through_header() {
    let mut header = BlockHeader {
      mapping_origin: std::ptr::null_mut(),
      prev: std::ptr::null_mut(),
      next: std::ptr::null_mut(),
      requested_size: 16,
      total_size: HEADER_SIZE + 16,
    };
    let header_ptr: *mut BlockHeader = &mut header;

    let payload = BlockHeader::payload(header_ptr);
    assert_eq!(payload as usize, header_ptr as usize + HEADER_SIZE);

    let recovered = unsafe { BlockHeader::from_payload(payload) };
    assert_eq!(recovered, header_ptr);
  }

  #[test]
  fn free_block_has_zero_requested_size() {
    let mut header = BlockHeader {
      mapping_origin: std::ptr::null_mut(),
      prev: std::ptr::null_mut(),
      next: std::ptr::null_mut(),
      requested_size: 0,
      total_size: HEADER_SIZE,
    };
    let header_ptr: *mut BlockHeader = &mut header;

    assert!(unsafe { BlockHeader::is_free(header_ptr) });
    header.requested_size = 4;
    assert!(!unsafe { BlockHeader::is_free(header_ptr) });
  }
}
