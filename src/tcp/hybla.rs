//! TCP Hybla (Caini & Firrincieli, 2004).
//!
//! Hybla scales window growth by `rho = rtt / rtt0`, so a long-RTT connection opens its window
//! as fast as a reference connection with RTT `rtt0` would:
//! - slow start grows the window by `2^rho - 1` segments per acked segment
//! - congestion avoidance grows it by `rho^2 / cwnd` segments per acked segment

use super::{
  seq_after, Baseline, RttEstimator, Segment, SequenceNumber, TcpState, Transport,
};
use crate::{
  config::Config,
  detail::ceil_div,
  error::{Error, Result},
};
use std::{net::SocketAddr, time::Duration};

/// Send side of a TCP connection running Hybla.
pub struct Hybla<T> {
  config: Config,
  transport: T,
  state: TcpState,
  connected: bool,
  rtt: RttEstimator,
  rho: f64,
  cwnd: u32,
  /// Fractional segments accumulated during congestion avoidance
  cwnd_cnt: f64,
  ssthresh: u32,
  snd_una: SequenceNumber,
  snd_nxt: SequenceNumber,
  /// Highest sequence number sent so far. Only differs from `snd_nxt` after a timeout.
  snd_max: SequenceNumber,
  /// Bytes written by the application but not yet sent
  backlog: u32,
  close_pending: bool,
  fin_seq: Option<SequenceNumber>,
}

impl<T: Transport> Hybla<T> {
  pub fn new(config: Config, transport: T) -> Self {
    let cwnd = config.initial_cwnd.saturating_mul(config.mss());
    let ssthresh = config.initial_ssthresh;
    Self {
      config,
      transport,
      state: TcpState::Closed,
      connected: false,
      rtt: RttEstimator::new(),
      rho: 1.0,
      cwnd,
      cwnd_cnt: 0.0,
      ssthresh,
      snd_una: 0,
      snd_nxt: 0,
      snd_max: 0,
      backlog: 0,
      close_pending: false,
      fin_seq: None,
    }
  }

  /// The SYN-ACK arrived after `rtt_sample`.
  pub fn on_established(&mut self, rtt_sample: Duration) -> Result<()> {
    if self.state != TcpState::SynSent {
      return Err(Error::InvalidState(self.state));
    }
    self.state = TcpState::Established;
    self.connected = true;
    self.cwnd = self.config.initial_cwnd.saturating_mul(self.config.mss());
    self.ssthresh = self.config.initial_ssthresh;
    self.on_rtt_sample(rtt_sample);
    log::debug!("established, rtt {:?}, rho {:.2}", rtt_sample, self.rho);
    Ok(())
  }

  /// Queue `bytes` of application data.
  pub fn write(&mut self, bytes: u32) -> Result<()> {
    use TcpState::*;
    match self.state {
      SynSent | Established | CloseWait if !self.close_pending => {
        self.backlog = self.backlog.saturating_add(bytes);
        Ok(())
      }
      state => Err(Error::InvalidState(state)),
    }
  }

  /// Application close. The FIN goes out once the backlog has been sent.
  pub fn close(&mut self) -> Result<()> {
    use TcpState::*;
    match self.state {
      Established | CloseWait if !self.close_pending => {
        self.close_pending = true;
        Ok(())
      }
      Closed | Listen | SynSent => {
        self.state = Closed;
        self.connected = false;
        self.backlog = 0;
        Ok(())
      }
      state => Err(Error::InvalidState(state)),
    }
  }

  /// The peer's FIN arrived.
  pub fn on_peer_close(&mut self) -> Result<()> {
    use TcpState::*;
    self.state = match self.state {
      Established => CloseWait,
      FinWait1 => Closing,
      FinWait2 => TimeWait,
      state => return Err(Error::InvalidState(state)),
    };
    Ok(())
  }

  pub fn on_rtt_sample(&mut self, sample: Duration) {
    self.rtt.update(sample);
    self.recalc_rho();
  }

  /// Fast retransmit: halve the window.
  pub fn on_loss(&mut self) {
    self.ssthresh = self.loss_threshold();
    self.cwnd = self.ssthresh;
    self.cwnd_cnt = 0.0;
  }

  /// Retransmission timeout: collapse the window and resend everything unacknowledged.
  pub fn on_timeout(&mut self) {
    self.ssthresh = self.loss_threshold();
    self.cwnd = self.config.mss();
    self.cwnd_cnt = 0.0;

    let mut unacked = self.in_flight();
    if let Some(fin) = self.fin_seq {
      if !seq_after(self.snd_una, fin) {
        unacked -= 1;
        self.fin_seq = None;
      }
    }
    self.backlog = self.backlog.saturating_add(unacked);
    self.snd_nxt = self.snd_una;
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  pub fn rho(&self) -> f64 {
    self.rho
  }

  pub fn backlog(&self) -> u32 {
    self.backlog
  }

  /// Bytes sent but not yet acknowledged, FIN included.
  pub fn in_flight(&self) -> u32 {
    self.snd_nxt.wrapping_sub(self.snd_una)
  }

  pub fn snd_una(&self) -> SequenceNumber {
    self.snd_una
  }

  fn loss_threshold(&self) -> u32 {
    std::cmp::max(self.in_flight() / 2, 2 * self.config.mss())
  }

  fn recalc_rho(&mut self) {
    let rtt0 = self.config.reference_rtt.as_secs_f64();
    if rtt0 > 0.0 {
      self.rho = f64::max(self.rtt.min().as_secs_f64() / rtt0, 1.0);
    }
  }

  fn grow(&mut self, segments: u32) {
    let mss = self.config.mss();
    if self.cwnd < self.ssthresh {
      // slow start
      let increment = (2f64.powf(self.rho) - 1.0) * segments as f64;
      let bytes = (increment * mss as f64) as u32;
      self.cwnd = std::cmp::min(self.cwnd.saturating_add(bytes), self.ssthresh);
    } else {
      // congestion avoidance
      let seg_cwnd = std::cmp::max(self.cwnd / mss, 1);
      self.cwnd_cnt += self.rho * self.rho * segments as f64 / seg_cwnd as f64;
      if self.cwnd_cnt >= 1.0 {
        let whole = self.cwnd_cnt.floor();
        self.cwnd_cnt -= whole;
        self.cwnd = self.cwnd.saturating_add((whole as u32).saturating_mul(mss));
      }
    }
  }

  fn advance_snd_max(&mut self) {
    if seq_after(self.snd_nxt, self.snd_max) {
      self.snd_max = self.snd_nxt;
    }
  }

  fn fin_acked(&mut self) {
    use TcpState::*;
    self.state = match self.state {
      FinWait1 => FinWait2,
      Closing => TimeWait,
      LastAck => {
        self.connected = false;
        Closed
      }
      state => state,
    };
    log::debug!("fin acked, now {:?}", self.state);
  }

  fn transmit(&mut self, segment: Segment) -> bool {
    match self.transport.send(segment) {
      Ok(()) => {
        log::trace!("sent {:?}", segment);
        true
      }
      Err(e) => {
        log::warn!("failed to send segment {}: {}", segment.seq, e);
        false
      }
    }
  }
}

impl<T: Transport> Baseline for Hybla<T> {
  fn connect(&mut self, addr: SocketAddr) -> Result<()> {
    if self.state != TcpState::Closed {
      return Err(Error::InvalidState(self.state));
    }
    self.transport.connect(addr)?;
    // the SYN occupies sequence number 0
    self.snd_una = 1;
    self.snd_nxt = 1;
    self.snd_max = 1;
    self.fin_seq = None;
    self.close_pending = false;
    self.state = TcpState::SynSent;
    log::debug!("connecting to {}", addr);
    Ok(())
  }

  fn new_ack(&mut self, seq: SequenceNumber) {
    if !seq_after(seq, self.snd_una) || seq_after(seq, self.snd_max) {
      log::trace!("ignoring ack {} outside ({}, {}]", seq, self.snd_una, self.snd_max);
      return;
    }

    if seq_after(seq, self.snd_nxt) {
      // covers data sent before a timeout rewound `snd_nxt`, no need to resend it
      let skipped = seq.wrapping_sub(self.snd_nxt);
      if skipped > self.backlog && self.close_pending && self.fin_seq.is_none() {
        self.fin_seq = Some(seq.wrapping_sub(1));
      }
      self.backlog = self.backlog.saturating_sub(skipped);
      self.snd_nxt = seq;
    }

    let mut acked = seq.wrapping_sub(self.snd_una);
    self.snd_una = seq;

    if let Some(fin) = self.fin_seq {
      if seq == fin.wrapping_add(1) {
        acked -= 1;
        self.fin_acked();
      }
    }

    if acked > 0 {
      self.grow(ceil_div(acked, self.config.mss()));
    }
  }

  fn send_pending_data(&mut self, with_ack: bool) -> bool {
    let fin_due = self.close_pending && self.fin_seq.is_none();
    if !self.state.can_send_data() && !fin_due {
      return false;
    }

    let mss = self.config.mss();
    let mut sent = false;
    while self.backlog > 0 {
      let window = self.cwnd.saturating_sub(self.in_flight());
      let mut len = std::cmp::min(mss, self.backlog);
      if len > window {
        // a window under one segment still lets an idle connection make progress
        if window == 0 || self.in_flight() > 0 {
          break;
        }
        len = window;
      }
      let segment = Segment {
        seq: self.snd_nxt,
        len,
        fin: false,
        ack: with_ack,
      };
      if !self.transmit(segment) {
        return sent;
      }
      self.snd_nxt = self.snd_nxt.wrapping_add(len);
      self.advance_snd_max();
      self.backlog -= len;
      sent = true;
    }

    if self.backlog == 0 && fin_due {
      let segment = Segment {
        seq: self.snd_nxt,
        len: 0,
        fin: true,
        ack: with_ack,
      };
      if self.transmit(segment) {
        self.fin_seq = Some(self.snd_nxt);
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.advance_snd_max();
        self.state = match self.state {
          TcpState::Established => TcpState::FinWait1,
          TcpState::CloseWait => TcpState::LastAck,
          state => state,
        };
        sent = true;
      }
    }

    sent
  }

  fn close_and_notify(&mut self) {
    if self.state != TcpState::Closed {
      log::debug!("closed from {:?}", self.state);
    }
    self.state = TcpState::Closed;
    self.connected = false;
    self.backlog = 0;
    self.close_pending = false;
  }

  fn rtt(&self) -> Duration {
    self.rtt.estimate()
  }

  fn cwnd(&self) -> u32 {
    self.cwnd
  }

  fn set_cwnd(&mut self, v: u32) {
    self.cwnd = v;
  }

  fn ssthresh(&self) -> u32 {
    self.ssthresh
  }

  fn set_ssthresh(&mut self, v: u32) {
    self.ssthresh = v;
  }

  fn state(&self) -> TcpState {
    self.state
  }

  fn connected(&self) -> bool {
    self.connected
  }
}
