use std::time::Duration;

/// Smoothed round-trip time, per RFC 6298.
///
/// Every reading is zero until the first sample arrives.
#[derive(Debug, Clone, Default)]
pub struct RttEstimator {
  /// The minimum observed RTT
  min: Duration,
  /// The smoothed RTT
  smooth: Option<Duration>,
}

impl RttEstimator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Best RTT estimate available
  #[inline]
  pub fn estimate(&self) -> Duration {
    self.smooth.unwrap_or(Duration::ZERO)
  }

  #[inline]
  pub fn min(&self) -> Duration {
    self.min
  }

  /// Update the estimate with the time between sending a segment and receiving its ack.
  pub fn update(&mut self, sample: Duration) {
    self.smooth = Some(match self.smooth {
      Some(smooth) => {
        self.min = std::cmp::min(self.min, sample);
        (7 * smooth + sample) / 8
      }
      None => {
        self.min = sample;
        sample
      }
    });
  }
}
