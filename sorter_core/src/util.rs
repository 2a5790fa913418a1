//! Common time/geometry helpers for sorter_core.

/// Integer division rounded to nearest, ties away from zero.
#[inline]
pub fn div_round_nearest_i64(num: i64, den: i64) -> i64 {
    debug_assert!(den != 0, "div_round_nearest_i64: zero divisor");
    let half = den.abs() / 2;
    if (num >= 0) == (den > 0) {
        (num + half) / den
    } else {
        (num - half) / den
    }
}

/// Whole cart pitches closest to `distance_mm` at the given pitch.
#[inline]
pub fn round_pitches(distance_mm: u32, spacing_mm: u32) -> i64 {
    div_round_nearest_i64(i64::from(distance_mm), i64::from(spacing_mm.max(1)))
}

/// Travel time in whole milliseconds for `distance_mm` at `speed_mmps`.
/// Returns `None` for non-positive or non-finite speed.
#[inline]
pub fn travel_time_ms(distance_mm: u64, speed_mmps: f64) -> Option<u64> {
    if !(speed_mmps.is_finite() && speed_mmps > 0.0) {
        return None;
    }
    let ms = (distance_mm as f64) * 1000.0 / speed_mmps;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(ms.round() as u64)
}
