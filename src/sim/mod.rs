//! A minimal single-bottleneck network for exercising [`HyblaMw`] end to end.
//!
//! Every flow is a bulk sender behind one shared link. The receiver acknowledges each segment
//! on arrival and closes its side as soon as the sender's FIN arrives. The middleware is a
//! [`Registry`] which hands every active connection an equal share of the link rate, whenever
//! a connection opens or the link rate changes.

mod scheduler;

pub use scheduler::Scheduler;

use crate::{
  config::Config,
  controller::HyblaMw,
  middleware::Registry,
  tcp::{Baseline, Hybla, Segment, SequenceNumber, TcpState, Transport},
  ConnectionId,
};
use std::{
  cell::RefCell,
  io,
  net::{Ipv4Addr, SocketAddr},
  rc::Rc,
  time::Duration,
};

/// IP + TCP header bytes serialized alongside every segment.
const HEADER_SIZE: u32 = 40;
/// Local ports are handed out from the IANA ephemeral range, 49152..=65535.
const FIRST_LOCAL_PORT: u16 = 49152;
const LOCAL_PORTS: usize = 16384;

#[derive(Debug, Clone)]
pub struct LinkConfig {
  /// One-way propagation delay
  pub delay: Duration,
  /// Initial link rate, in bytes/sec
  pub rate: u32,
  /// How long a connection lingers in `TimeWait` before it is torn down
  pub time_wait: Duration,
}

impl Default for LinkConfig {
  fn default() -> Self {
    Self {
      delay: Duration::from_millis(25),
      rate: 1_250_000,
      time_wait: Duration::from_secs(1),
    }
  }
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
  pub start: Duration,
  /// Bytes to transfer before closing
  pub bytes: u32,
  /// Nothing listens on port 0, connecting there is refused.
  pub remote: SocketAddr,
  pub tcp: Config,
}

impl Default for FlowConfig {
  fn default() -> Self {
    Self {
      start: Duration::ZERO,
      bytes: 1_000_000,
      remote: SocketAddr::from((Ipv4Addr::new(10, 0, 0, 2), 9)),
      tcp: Config::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
  Established,
  Ack,
  Bandwidth,
}

/// Window state right after an event touched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
  pub at: Duration,
  pub cause: Cause,
  pub cwnd: u32,
  pub ssthresh: u32,
}

#[derive(Debug, Clone)]
pub struct FlowReport {
  pub id: ConnectionId,
  pub refused: bool,
  pub bytes_acked: u32,
  pub established_at: Option<Duration>,
  /// All data acknowledged
  pub completed_at: Option<Duration>,
  pub closed_at: Option<Duration>,
  pub final_state: TcpState,
  pub trace: Vec<Sample>,
}

#[derive(Debug, Clone)]
pub struct Report {
  pub flows: Vec<FlowReport>,
  pub duplicate_closes: u64,
  pub active_at_end: usize,
  pub ended_at: Duration,
}

enum Wire {
  Syn(SocketAddr),
  Data(Segment),
}

type Outbox = Rc<RefCell<Vec<Wire>>>;

/// Queues whatever the baseline sends so the network can put it on the link.
#[derive(Clone, Default)]
pub struct SimTransport {
  outbox: Outbox,
}

impl Transport for SimTransport {
  fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
    if addr.port() == 0 {
      return Err(io::ErrorKind::ConnectionRefused.into());
    }
    self.outbox.borrow_mut().push(Wire::Syn(addr));
    Ok(())
  }

  fn send(&mut self, segment: Segment) -> io::Result<()> {
    self.outbox.borrow_mut().push(Wire::Data(segment));
    Ok(())
  }
}

enum Event {
  Open(usize),
  Established(usize),
  Ack {
    flow: usize,
    seq: SequenceNumber,
    /// When the acknowledged segment was sent
    echo: Duration,
  },
  PeerFin(usize),
  TimeWaitExpired(usize),
  Capacity(u32),
  Bandwidth { flow: usize, bw: u32 },
}

struct Flow {
  cc: HyblaMw<Hybla<SimTransport>>,
  outbox: Outbox,
  config: FlowConfig,
  syn_at: Duration,
  time_wait_armed: bool,
  report: FlowReport,
}

pub struct Network {
  link: LinkConfig,
  rate: u32,
  /// When the link finishes serializing what it has been given
  link_free_at: Duration,
  scheduler: Scheduler<Event>,
  registry: Rc<RefCell<Registry>>,
  flows: Vec<Flow>,
}

impl Network {
  pub fn new(link: LinkConfig) -> Self {
    Self {
      rate: link.rate,
      link,
      link_free_at: Duration::ZERO,
      scheduler: Scheduler::new(),
      registry: Rc::new(RefCell::new(Registry::new())),
      flows: Vec::new(),
    }
  }

  pub fn registry(&self) -> &Rc<RefCell<Registry>> {
    &self.registry
  }

  pub fn add_flow(&mut self, config: FlowConfig) -> ConnectionId {
    let index = self.flows.len();
    let local = local_addr(index);
    let id = ConnectionId::of(&(local, config.remote));

    let transport = SimTransport::default();
    let outbox = transport.outbox.clone();
    let cc = HyblaMw::new(id, Hybla::new(config.tcp.clone(), transport))
      .with_notifier(self.registry.clone());

    self.scheduler.schedule_at(config.start, Event::Open(index));
    self.flows.push(Flow {
      cc,
      outbox,
      config,
      syn_at: Duration::ZERO,
      time_wait_armed: false,
      report: FlowReport {
        id,
        refused: false,
        bytes_acked: 0,
        established_at: None,
        completed_at: None,
        closed_at: None,
        final_state: TcpState::Closed,
        trace: Vec::new(),
      },
    });
    id
  }

  /// Change the link rate at `at`.
  pub fn set_capacity_at(&mut self, at: Duration, rate: u32) {
    self.scheduler.schedule_at(at, Event::Capacity(rate));
  }

  /// Process events until the queue drains or the next one is due after `deadline`.
  pub fn run(mut self, deadline: Duration) -> Report {
    while let Some(at) = self.scheduler.peek() {
      if at > deadline {
        break;
      }
      if let Some((_, event)) = self.scheduler.pop() {
        self.handle(event);
      }
    }

    let registry = self.registry.borrow();
    Report {
      flows: self
        .flows
        .into_iter()
        .map(|f| FlowReport {
          final_state: f.cc.state(),
          ..f.report
        })
        .collect(),
      duplicate_closes: registry.duplicate_closes(),
      active_at_end: registry.active_count(),
      ended_at: self.scheduler.now(),
    }
  }

  fn handle(&mut self, event: Event) {
    let now = self.scheduler.now();
    match event {
      Event::Open(i) => self.open(i),
      Event::Established(i) => {
        let flow = &mut self.flows[i];
        let sample = now - flow.syn_at;
        if let Err(e) = flow.cc.baseline_mut().on_established(sample) {
          log::warn!("{}: {}", flow.report.id, e);
          return;
        }
        flow.report.established_at = Some(now);
        // bulk sender: everything is already queued, the FIN follows the last byte
        if let Err(e) = flow.cc.baseline_mut().close() {
          log::warn!("{}: {}", flow.report.id, e);
        }
        let with_ack = flow.cc.connected();
        flow.cc.send_pending_data(with_ack);
        self.record(i, Cause::Established);
        self.transmit(i);
      }
      Event::Ack { flow: i, seq, echo } => {
        let flow = &mut self.flows[i];
        flow.cc.baseline_mut().on_rtt_sample(now - echo);
        flow.cc.new_ack(seq);

        let tcp = flow.cc.baseline();
        flow.report.bytes_acked = flow
          .config
          .bytes
          .saturating_sub(tcp.backlog() + data_in_flight(tcp));
        if flow.report.completed_at.is_none() && flow.report.bytes_acked == flow.config.bytes {
          flow.report.completed_at = Some(now);
        }
        self.record(i, Cause::Ack);
        self.transmit(i);
        self.arm_time_wait(i);
      }
      Event::PeerFin(i) => {
        let flow = &mut self.flows[i];
        if let Err(e) = flow.cc.baseline_mut().on_peer_close() {
          log::warn!("{}: {}", flow.report.id, e);
        }
        self.arm_time_wait(i);
      }
      Event::TimeWaitExpired(i) => {
        let flow = &mut self.flows[i];
        flow.cc.close_and_notify();
        flow.report.closed_at = Some(now);
        self.registry.borrow_mut().prune();
      }
      Event::Capacity(rate) => {
        log::info!("link rate {} -> {} bytes/s", self.rate, rate);
        self.rate = rate;
        self.push_shares();
      }
      Event::Bandwidth { flow: i, bw } => {
        let flow = &mut self.flows[i];
        if self.registry.borrow().is_active(&flow.report.id) {
          flow.cc.set_bandwidth(bw);
          self.record(i, Cause::Bandwidth);
        }
      }
    }
  }

  fn open(&mut self, i: usize) {
    let now = self.scheduler.now();
    let flow = &mut self.flows[i];
    if let Err(e) = flow.cc.connect(flow.config.remote) {
      log::warn!("{}: connect to {} failed: {}", flow.report.id, flow.config.remote, e);
      flow.report.refused = true;
      return;
    }
    flow.syn_at = now;

    let bytes = flow.config.bytes;
    if let Err(e) = flow.cc.baseline_mut().write(bytes) {
      log::warn!("{}: {}", flow.report.id, e);
    }

    self.transmit(i);
    self.push_shares();
  }

  /// Hand every active connection its share of the current link rate.
  fn push_shares(&mut self) {
    let shares = self.registry.borrow().fair_share(self.rate);
    for (id, bw) in shares {
      if let Some(flow) = self.flows.iter().position(|f| f.report.id == id) {
        self
          .scheduler
          .schedule(Duration::ZERO, Event::Bandwidth { flow, bw });
      }
    }
  }

  /// Put everything flow `i` has sent on the link.
  fn transmit(&mut self, i: usize) {
    let now = self.scheduler.now();
    let delay = self.link.delay;
    let wires: Vec<Wire> = self.flows[i].outbox.borrow_mut().drain(..).collect();
    for wire in wires {
      match wire {
        Wire::Syn(_) => {
          self.scheduler.schedule(2 * delay, Event::Established(i));
        }
        Wire::Data(segment) => {
          let departs = std::cmp::max(now, self.link_free_at) + self.serialization(segment.len);
          self.link_free_at = departs;

          let ack = segment.seq.wrapping_add(segment.len + segment.fin as u32);
          let back = departs + 2 * delay;
          self.scheduler.schedule_at(
            back,
            Event::Ack {
              flow: i,
              seq: ack,
              echo: now,
            },
          );
          if segment.fin {
            self.scheduler.schedule_at(back, Event::PeerFin(i));
          }
        }
      }
    }
  }

  fn serialization(&self, len: u32) -> Duration {
    let bytes = (len + HEADER_SIZE) as u64;
    Duration::from_nanos(bytes * 1_000_000_000 / std::cmp::max(self.rate, 1) as u64)
  }

  fn arm_time_wait(&mut self, i: usize) {
    let flow = &mut self.flows[i];
    if flow.cc.state() == TcpState::TimeWait && !flow.time_wait_armed {
      flow.time_wait_armed = true;
      self
        .scheduler
        .schedule(self.link.time_wait, Event::TimeWaitExpired(i));
    }
  }

  fn record(&mut self, i: usize, cause: Cause) {
    let at = self.scheduler.now();
    let flow = &mut self.flows[i];
    flow.report.trace.push(Sample {
      at,
      cause,
      cwnd: flow.cc.cwnd(),
      ssthresh: flow.cc.ssthresh(),
    });
  }
}

/// Flow `index` sends from its own port, moving on to the next host once the ports run out.
fn local_addr(index: usize) -> SocketAddr {
  let port = FIRST_LOCAL_PORT + (index % LOCAL_PORTS) as u16;
  let host = u32::from(Ipv4Addr::new(10, 1, 0, 1)).wrapping_add((index / LOCAL_PORTS) as u32);
  SocketAddr::from((Ipv4Addr::from(host), port))
}

/// Unacknowledged payload bytes, not counting an outstanding FIN.
fn data_in_flight(tcp: &Hybla<SimTransport>) -> u32 {
  let in_flight = tcp.in_flight();
  match tcp.state() {
    TcpState::FinWait1 | TcpState::Closing | TcpState::LastAck if in_flight > 0 => in_flight - 1,
    _ => in_flight,
  }
}

#[cfg(test)]
mod tests {
  use {super::*, crate::detail::bdp, pretty_assertions::assert_eq};

  macro_rules! ms {
    ($v:literal) => {
      Duration::from_millis($v)
    };
  }

  fn link(rate: u32) -> LinkConfig {
    LinkConfig {
      delay: ms!(10),
      rate,
      time_wait: ms!(100),
    }
  }

  #[test]
  fn single_flow_runs_to_completion() {
    let mut net = Network::new(link(1_000_000));
    let id = net.add_flow(FlowConfig {
      bytes: 200_000,
      ..Default::default()
    });
    let registry = net.registry().clone();
    let report = net.run(Duration::from_secs(60));

    let flow = &report.flows[0];
    assert_eq!(flow.id, id);
    assert!(!flow.refused);
    assert_eq!(flow.bytes_acked, 200_000);
    assert!(flow.established_at.is_some());
    assert!(flow.completed_at.is_some());
    assert!(flow.closed_at > flow.completed_at);
    assert_eq!(flow.final_state, TcpState::Closed);

    assert_eq!(report.active_at_end, 0);
    assert!(!registry.borrow().is_active(&id));
    assert!(report.duplicate_closes >= 1);
  }

  #[test]
  fn window_never_exceeds_threshold_after_an_ack() {
    let mut net = Network::new(link(1_000_000));
    net.add_flow(FlowConfig {
      bytes: 500_000,
      ..Default::default()
    });
    let report = net.run(Duration::from_secs(60));

    let acks: Vec<_> = report.flows[0]
      .trace
      .iter()
      .filter(|s| s.cause == Cause::Ack)
      .collect();
    assert!(!acks.is_empty());
    for s in acks {
      assert!(s.cwnd <= s.ssthresh, "{:?}", s);
    }
  }

  #[test]
  fn threshold_settles_near_the_path_bdp() {
    let mut net = Network::new(link(1_000_000));
    net.add_flow(FlowConfig {
      bytes: 500_000,
      ..Default::default()
    });
    let report = net.run(Duration::from_secs(60));

    // propagation plus serialization of a full segment: 20ms + 576us
    let min_rtt = ms!(20) + Duration::from_micros(576);
    let last = report.flows[0]
      .trace
      .iter()
      .rev()
      .find(|s| s.cause == Cause::Ack)
      .unwrap();
    assert!(last.ssthresh >= bdp(1_000_000, ms!(20)));
    assert!(last.ssthresh <= bdp(1_000_000, min_rtt));
  }

  #[test]
  fn capacity_drop_halves_window() {
    let mut net = Network::new(link(2_000_000));
    net.add_flow(FlowConfig {
      bytes: 20_000_000,
      ..Default::default()
    });
    net.set_capacity_at(Duration::from_secs(2), 500_000);
    let report = net.run(Duration::from_secs(3));

    let drop = report.flows[0]
      .trace
      .iter()
      .find(|s| s.cause == Cause::Bandwidth && s.at == Duration::from_secs(2))
      .unwrap();
    assert_eq!(drop.cwnd, drop.ssthresh / 2);
    assert!(drop.ssthresh < bdp(2_000_000, ms!(20)));
    assert!(drop.ssthresh >= bdp(500_000, ms!(20)));
  }

  #[test]
  fn second_flow_takes_half_the_link() {
    let mut net = Network::new(link(1_000_000));
    let first = net.add_flow(FlowConfig {
      bytes: 2_000_000,
      ..Default::default()
    });
    net.add_flow(FlowConfig {
      start: Duration::from_secs(1),
      bytes: 200_000,
      ..Default::default()
    });
    let registry = net.registry().clone();
    let report = net.run(Duration::from_secs(120));

    for flow in &report.flows {
      assert!(flow.completed_at.is_some(), "{:?} did not finish", flow.id);
    }

    // the first flow had its window halved when the second one opened
    let halved = report.flows[0]
      .trace
      .iter()
      .find(|s| s.cause == Cause::Bandwidth && s.at == Duration::from_secs(1))
      .unwrap();
    assert_eq!(halved.cwnd, halved.ssthresh / 2);
    assert!(!registry.borrow().is_active(&first));
  }

  #[test]
  fn refused_connection_is_never_registered() {
    let mut net = Network::new(link(1_000_000));
    let id = net.add_flow(FlowConfig {
      remote: SocketAddr::from((Ipv4Addr::new(10, 0, 0, 2), 0)),
      ..Default::default()
    });
    let registry = net.registry().clone();
    let report = net.run(Duration::from_secs(10));

    assert!(report.flows[0].refused);
    assert_eq!(report.flows[0].bytes_acked, 0);
    assert_eq!(registry.borrow().activity(&id), None);
  }

  #[test]
  fn slow_link_still_completes() {
    // each flow's share times the RTT is well under one segment
    let mut net = Network::new(link(10_000));
    for _ in 0..2 {
      net.add_flow(FlowConfig {
        bytes: 20_000,
        ..Default::default()
      });
    }
    let report = net.run(Duration::from_secs(3600));

    for flow in &report.flows {
      assert_eq!(flow.bytes_acked, 20_000, "{:?}", flow.id);
      assert!(flow.completed_at.is_some());
      assert!(flow.trace.iter().any(|s| s.cause == Cause::Ack && s.cwnd < 536));
    }
    assert_eq!(report.active_at_end, 0);
  }

  #[test]
  fn torn_down_connections_are_forgotten() {
    let mut net = Network::new(link(1_000_000));
    let id = net.add_flow(FlowConfig {
      bytes: 10_000,
      ..Default::default()
    });
    let registry = net.registry().clone();
    let report = net.run(Duration::from_secs(60));

    assert!(report.flows[0].closed_at.is_some());
    assert_eq!(registry.borrow().activity(&id), None);
  }

  #[test]
  fn local_addresses_stay_unique() {
    assert_eq!(local_addr(0).port(), 49152);
    assert_eq!(local_addr(LOCAL_PORTS - 1).port(), 65535);
    assert_eq!(local_addr(LOCAL_PORTS).port(), 49152);
    assert_ne!(local_addr(0), local_addr(LOCAL_PORTS));
    assert_ne!(local_addr(LOCAL_PORTS - 1), local_addr(LOCAL_PORTS));
  }
}
