//! TCP Hybla congestion control steered by bandwidth hints from a middleware layer.
//!
//! [`HyblaMw`] wraps a [`tcp::Baseline`] (normally [`tcp::Hybla`]) and keeps its slow start
//! threshold pinned to the bandwidth-delay product reported by a [`BandwidthNotifier`].

pub mod config;
pub mod controller;
pub mod error;
pub mod middleware;
pub mod sim;
pub mod tcp;

mod detail;

pub use config::Config;
pub use controller::HyblaMw;
pub use error::{Error, Result};
pub use middleware::{BandwidthNotifier, Registry, SharedNotifier};

use std::{
  collections::hash_map::DefaultHasher,
  fmt,
  hash::{Hash, Hasher},
};

/// Opaque identity of a connection, used by the middleware as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
  /// Derive an id by hashing `v`, e.g. the endpoint tuple of the connection.
  pub fn of<T: Hash + ?Sized>(v: &T) -> Self {
    let mut s = DefaultHasher::new();
    v.hash(&mut s);
    Self(s.finish())
  }
}

impl fmt::Debug for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ConnectionId({:016x})", self.0)
  }
}

impl fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}
