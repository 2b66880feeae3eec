use super::SequenceNumber;
use std::{io, net::SocketAddr};

/// An outgoing TCP segment, as far as congestion control cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
  pub seq: SequenceNumber,
  /// Payload length in bytes
  pub len: u32,
  pub fin: bool,
  pub ack: bool,
}

/// Whatever carries segments for the baseline: a simulated link, a test double.
pub trait Transport {
  /// Begin the handshake with `addr`.
  fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;
  fn send(&mut self, segment: Segment) -> io::Result<()>;
}
