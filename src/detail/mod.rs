#[inline]
pub const fn ceil_div(x: u32, d: u32) -> u32 {
  x / d + (x % d != 0) as u32
}

/// Bandwidth-delay product in bytes, floored and saturated to `u32`.
#[inline]
pub fn bdp(bytes_per_sec: u32, rtt: std::time::Duration) -> u32 {
  let bytes = bytes_per_sec as u128 * rtt.as_nanos() / 1_000_000_000;
  u32::try_from(bytes).unwrap_or(u32::MAX)
}
