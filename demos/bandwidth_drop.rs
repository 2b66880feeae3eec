//! Two bulk transfers share a link whose capacity drops by three quarters mid-run.
//!
//! `RUST_LOG=debug` shows every threshold recomputation.

use anyhow::{ensure, Result};
use hybla_mw::sim::{Cause, FlowConfig, LinkConfig, Network};
use std::time::Duration;

fn init_log() {
  // default RUST_LOG=info
  std::env::set_var(
    "RUST_LOG",
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
  );
  env_logger::init();
}

fn main() -> Result<()> {
  init_log();

  let mut net = Network::new(LinkConfig {
    delay: Duration::from_millis(300),
    rate: 2_000_000,
    ..Default::default()
  });
  net.add_flow(FlowConfig {
    bytes: 20_000_000,
    ..Default::default()
  });
  net.add_flow(FlowConfig {
    start: Duration::from_secs(5),
    bytes: 5_000_000,
    ..Default::default()
  });
  net.set_capacity_at(Duration::from_secs(10), 500_000);

  let report = net.run(Duration::from_secs(600));

  for flow in &report.flows {
    log::info!(
      "{}: {} bytes, established {:?}, done {:?}, closed {:?}",
      flow.id,
      flow.bytes_acked,
      flow.established_at,
      flow.completed_at,
      flow.closed_at
    );
    for s in flow.trace.iter().filter(|s| s.cause == Cause::Bandwidth) {
      log::info!(
        "  {:>8.3}s bandwidth update: cwnd {:>8} ssthresh {:>8}",
        s.at.as_secs_f64(),
        s.cwnd,
        s.ssthresh
      );
    }
  }
  log::info!(
    "duplicate close notifications: {}, still active: {}",
    report.duplicate_closes,
    report.active_at_end
  );

  ensure!(report.active_at_end == 0, "some connections never closed");
  Ok(())
}
