use std::{num::NonZeroU32, time::Duration};

const DEFAULT_SEGMENT_SIZE: NonZeroU32 = match NonZeroU32::new(536) {
  Some(v) => v,
  None => unreachable!(),
};

/// Per-socket parameters of the baseline algorithm.
#[derive(Debug, Clone)]
pub struct Config {
  /// Maximum segment size, in bytes.
  pub segment_size: NonZeroU32,
  /// Congestion window once the handshake completes, in segments.
  pub initial_cwnd: u32,
  /// Slow start threshold once the handshake completes, in bytes.
  pub initial_ssthresh: u32,
  /// Hybla reference RTT (`rtt0`). Connections with a longer RTT grow their window
  /// as fast as one with this RTT would.
  pub reference_rtt: Duration,
}

impl Config {
  /// Maximum segment size, in bytes.
  #[inline]
  pub fn mss(&self) -> u32 {
    self.segment_size.get()
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      segment_size: DEFAULT_SEGMENT_SIZE,
      initial_cwnd: 1,
      initial_ssthresh: 65535,
      reference_rtt: Duration::from_millis(25),
    }
  }
}
