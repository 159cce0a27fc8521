//! 16.16 signed fixed-point conversions.
//!
//! Kept small and deterministic, same spirit as a plain numeric utility module:
//! no surprises, no panics, saturating instead of overflowing.

/// One unit of fixed-point integer equals `1 / FIXED_SCALE` of a float unit.
pub const FIXED_SCALE: f64 = 65536.0;

const SATURATION_BOUND: f64 = 32768.0;

/// Converts a float to a 16.16 signed fixed-point integer, saturating at the
/// representable range instead of wrapping.
pub fn to_fixed(x: f64) -> i32 {
    if x >= SATURATION_BOUND {
        i32::MAX
    } else if x < -SATURATION_BOUND {
        i32::MIN
    } else {
        (x * FIXED_SCALE).trunc() as i32
    }
}

/// Converts a 16.16 signed fixed-point integer back to a float.
pub fn from_fixed(n: i32) -> f64 {
    n as f64 / FIXED_SCALE
}
