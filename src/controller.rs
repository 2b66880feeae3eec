use crate::{
  detail::bdp,
  error::Result,
  middleware::SharedNotifier,
  tcp::{Baseline, SequenceNumber, TcpState},
  ConnectionId,
};
use std::{net::SocketAddr, time::Duration};

/// Used as the minimum RTT until the connection has produced a real sample.
pub const DEFAULT_MIN_RTT: Duration = Duration::from_secs(1);

/// Hybla driven by middleware bandwidth hints.
///
/// The slow start threshold tracks the bandwidth-delay product of the last bandwidth the
/// middleware reported, and the congestion window is never allowed to exceed it after an ack.
/// A drop in reported bandwidth halves the window immediately instead of waiting for loss.
pub struct HyblaMw<B> {
  id: ConnectionId,
  tcp: B,
  min_rtt: Duration,
  /// bytes/sec
  available_bw: u32,
  notifier: Option<SharedNotifier>,
}

impl<B: Baseline> HyblaMw<B> {
  pub fn new(id: ConnectionId, tcp: B) -> Self {
    Self {
      id,
      tcp,
      min_rtt: Duration::ZERO,
      available_bw: 0,
      notifier: None,
    }
  }

  pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
    self.notifier = Some(notifier);
    self
  }

  pub fn set_notifier(&mut self, notifier: SharedNotifier) {
    self.notifier = Some(notifier);
  }

  pub fn id(&self) -> ConnectionId {
    self.id
  }

  /// Smallest RTT seen so far, zero before the first ack.
  pub fn min_rtt(&self) -> Duration {
    self.min_rtt
  }

  /// Last bandwidth pushed by the middleware, in bytes/sec.
  pub fn available_bandwidth(&self) -> u32 {
    self.available_bw
  }

  pub fn baseline(&self) -> &B {
    &self.tcp
  }

  pub fn baseline_mut(&mut self) -> &mut B {
    &mut self.tcp
  }

  /// Bandwidth update from the middleware, in bytes/sec.
  ///
  /// The threshold uses the current RTT estimate rather than the minimum, so it follows the
  /// path as it is now. Any decrease halves the window straight away. An increase leaves the
  /// window alone, and subsequent acks grow it towards the new threshold.
  pub fn set_bandwidth(&mut self, bw: u32) {
    let rtt = self.tcp.rtt();

    let old_bw = self.available_bw;
    self.available_bw = bw;

    let ssthresh = bdp(bw, rtt);
    self.tcp.set_ssthresh(ssthresh);

    if old_bw > bw {
      self.tcp.set_cwnd(ssthresh / 2);
    }

    log::debug!(
      "{}: bandwidth {} -> {}, rtt {:?}, ssthresh {}, cwnd {}",
      self.id,
      old_bw,
      bw,
      rtt,
      ssthresh,
      self.tcp.cwnd()
    );
  }

  fn notifier(&self) -> &SharedNotifier {
    match &self.notifier {
      Some(notifier) => notifier,
      None => panic!("{}: no middleware protocol bound to the connection", self.id),
    }
  }
}

impl<B: Baseline> Baseline for HyblaMw<B> {
  /// Connects, then registers the connection with the middleware.
  fn connect(&mut self, addr: SocketAddr) -> Result<()> {
    self.tcp.connect(addr)?;
    self
      .notifier()
      .borrow_mut()
      .notify_connection_opened(self.id);
    Ok(())
  }

  fn new_ack(&mut self, seq: SequenceNumber) {
    let rtt = self.tcp.rtt();

    if !rtt.is_zero() && (self.min_rtt.is_zero() || rtt < self.min_rtt) {
      self.min_rtt = rtt;
    }

    if self.min_rtt.is_zero() {
      self.min_rtt = DEFAULT_MIN_RTT;
    }

    let ssthresh = bdp(self.available_bw, self.min_rtt);
    self.tcp.set_ssthresh(ssthresh);
    log::debug!("{}: new ssthresh {}", self.id, ssthresh);

    self.tcp.new_ack(seq);

    if self.tcp.cwnd() > ssthresh {
      self.tcp.set_cwnd(ssthresh);
    }

    let with_ack = self.tcp.connected();
    self.send_pending_data(with_ack);
  }

  /// Sends, then tells the middleware if the connection is on its way out.
  fn send_pending_data(&mut self, with_ack: bool) -> bool {
    let sent = self.tcp.send_pending_data(with_ack);

    if self.tcp.state().is_closing_or_later() {
      self
        .notifier()
        .borrow_mut()
        .notify_connection_closed(self.id);
    }

    sent
  }

  fn close_and_notify(&mut self) {
    self.tcp.close_and_notify();
    self
      .notifier()
      .borrow_mut()
      .notify_connection_closed(self.id);
  }

  fn rtt(&self) -> Duration {
    self.tcp.rtt()
  }

  fn cwnd(&self) -> u32 {
    self.tcp.cwnd()
  }

  fn set_cwnd(&mut self, v: u32) {
    self.tcp.set_cwnd(v)
  }

  fn ssthresh(&self) -> u32 {
    self.tcp.ssthresh()
  }

  fn set_ssthresh(&mut self, v: u32) {
    self.tcp.set_ssthresh(v)
  }

  fn state(&self) -> TcpState {
    self.tcp.state()
  }

  fn connected(&self) -> bool {
    self.tcp.connected()
  }
}
