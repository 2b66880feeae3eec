//! Baseline TCP sender: the algorithm [`HyblaMw`](crate::HyblaMw) builds on, and the seams
//! around it.

mod hybla;
mod rtt;
mod state;
mod transport;

pub use hybla::Hybla;
pub use rtt::RttEstimator;
pub use state::TcpState;
pub use transport::{Segment, Transport};

use crate::error::Result;
use std::{net::SocketAddr, time::Duration};

/// 32-bit TCP sequence number, compared with wrapping arithmetic.
pub type SequenceNumber = u32;

/// `a` is strictly later than `b` in sequence space.
#[inline]
pub(crate) fn seq_after(a: SequenceNumber, b: SequenceNumber) -> bool {
  (a.wrapping_sub(b) as i32) > 0
}

/// The operations a congestion controller layers on top of.
///
/// Windows and thresholds are in bytes.
pub trait Baseline {
  /// Start opening a connection to `addr`.
  fn connect(&mut self, addr: SocketAddr) -> Result<()>;
  /// Called once per acknowledgement that advances the send window.
  fn new_ack(&mut self, seq: SequenceNumber);
  /// Send as much queued data as the window allows. Returns `true` if anything was sent.
  fn send_pending_data(&mut self, with_ack: bool) -> bool;
  /// Tear the connection down and release its resources.
  fn close_and_notify(&mut self);

  /// Current smoothed RTT estimate. Zero until the first sample.
  fn rtt(&self) -> Duration;
  fn cwnd(&self) -> u32;
  fn set_cwnd(&mut self, v: u32);
  fn ssthresh(&self) -> u32;
  fn set_ssthresh(&mut self, v: u32);
  fn state(&self) -> TcpState;
  /// Whether outgoing segments should carry an ACK.
  fn connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sequence_wraps() {
    assert!(seq_after(1, 0));
    assert!(!seq_after(0, 0));
    assert!(!seq_after(0, 1));
    assert!(seq_after(3, u32::MAX - 2));
    assert!(!seq_after(u32::MAX - 2, 3));
  }
}
