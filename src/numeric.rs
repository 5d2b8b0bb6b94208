//! Bit and coordinate arithmetic shared by the track readers.

/// Reverses the byte order of a 32-bit value (network order <-> host order).
#[inline]
pub fn byte_swap_32(value: u32) -> u32 {
    value.swap_bytes()
}

/// Compares two 64-bit values stored as `(high, low)` 32-bit halves.
///
/// The polarity is larger-first: `1` when `b` is the larger value, `-1` when
/// `b` is the smaller one and `0` when both are equal. Existing sorts of
/// block offsets rely on this order, so it must not be flipped to match
/// [`Ord::cmp`].
pub fn cmp_two_part(a_high: u32, a_low: u32, b_high: u32, b_low: u32) -> i32 {
    (b_high, b_low).cmp(&(a_high, a_low)) as i32
}

/// Length of the overlap between the half-open ranges `[start1, end1)` and
/// `[start2, end2)`.
///
/// Zero means the ranges only touch, a negative value is the gap between
/// them. Inputs are not checked for `start <= end`.
#[inline]
pub fn range_intersection(start1: i64, end1: i64, start2: i64, end2: i64) -> i64 {
    end1.min(end2).saturating_sub(start1.max(start2))
}
