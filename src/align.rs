//! Alignment and rounding helpers.
//!
//! The allocator rounds sizes up to two different, independent power-of-two
//! moduli: the fixed 8-byte [`ALIGNMENT`] unit every header and payload must
//! respect, and the OS-reported page size every mapping must respect. Both
//! are computed with the same bitmask trick, exposed here as one macro.

/// The allocator's fixed alignment unit, in bytes. Headers and payloads are
/// always placed on multiples of this value; there is no support for
/// caller-requested over-alignment.
pub const ALIGNMENT: usize = 8;

/// Rounds `value` up to the next multiple of `multiple`, which must be a
/// power of two.
///
/// # Examples
///
/// ```rust
/// use mmalloc::round_up;
///
/// assert_eq!(round_up!(13, 8), 16);
/// assert_eq!(round_up!(16, 8), 16);
/// assert_eq!(round_up!(0, 8), 0);
/// ```
#[macro_export]
macro_rules! round_up {
  ($value:expr, $multiple:expr) => {
    (($value) + ($multiple) - 1) & !(($multiple) - 1)
  };
}

#[cfg(test)]
mod tests {
  #[test]
  fn rounds_up_to_alignment() {
    for i in 0..10usize {
      let sizes = (8 * i + 1)..=(8 * (i + 1));
      let expected = 8 * (i + 1);

      for size in sizes {
        assert_eq!(expected, round_up!(size, 8));
      }
    }
  }

  #[test]
  fn rounds_up_to_page_size() {
    let page = 4096usize;

    assert_eq!(round_up!(0, page), 0);
    assert_eq!(round_up!(1, page), page);
    assert_eq!(round_up!(page, page), page);
    assert_eq!(round_up!(page + 1, page), 2 * page);
  }
}
