use super::BandwidthNotifier;
use crate::ConnectionId;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
  Active,
  Closed,
}

type ConnectionTable = IndexMap<ConnectionId, Activity>;

/// Keeps track of which connections are active, in the order they were opened.
#[derive(Debug, Default)]
pub struct Registry {
  table: ConnectionTable,
  duplicate_closes: u64,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn activity(&self, id: &ConnectionId) -> Option<Activity> {
    self.table.get(id).copied()
  }

  pub fn is_active(&self, id: &ConnectionId) -> bool {
    self.activity(id) == Some(Activity::Active)
  }

  /// Active connections, oldest first.
  pub fn active(&self) -> impl Iterator<Item = ConnectionId> + '_ {
    self
      .table
      .iter()
      .filter(|(_, a)| **a == Activity::Active)
      .map(|(id, _)| *id)
  }

  pub fn active_count(&self) -> usize {
    self.active().count()
  }

  /// Close notifications received for connections that were already closed.
  pub fn duplicate_closes(&self) -> u64 {
    self.duplicate_closes
  }

  /// Forget closed connections.
  pub fn prune(&mut self) {
    self.table.retain(|_, a| *a == Activity::Active);
  }

  /// Split `total` bytes/sec evenly across active connections.
  ///
  /// Leftover bytes go to the connections that were opened first.
  pub fn fair_share(&self, total: u32) -> Vec<(ConnectionId, u32)> {
    let n = self.active_count() as u32;
    if n == 0 {
      return Vec::new();
    }
    let (share, rest) = (total / n, total % n);
    self
      .active()
      .enumerate()
      .map(|(i, id)| (id, share + ((i as u32) < rest) as u32))
      .collect()
  }
}

impl BandwidthNotifier for Registry {
  fn notify_connection_opened(&mut self, id: ConnectionId) {
    match self.table.insert(id, Activity::Active) {
      Some(Activity::Active) => log::warn!("{} opened again without being closed", id),
      _ => log::info!("{} opened", id),
    }
  }

  fn notify_connection_closed(&mut self, id: ConnectionId) {
    match self.table.get_mut(&id) {
      Some(a) if *a == Activity::Active => {
        *a = Activity::Closed;
        log::info!("{} closed", id);
      }
      Some(_) => {
        self.duplicate_closes += 1;
        log::trace!("{} already closed", id);
      }
      None => log::warn!("close for unknown connection {}", id),
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, pretty_assertions::assert_eq};

  fn id(n: u32) -> ConnectionId {
    ConnectionId::of(&n)
  }

  #[test]
  fn open_then_close() {
    let mut mw = Registry::new();
    mw.notify_connection_opened(id(1));
    assert!(mw.is_active(&id(1)));
    assert_eq!(mw.active_count(), 1);

    mw.notify_connection_closed(id(1));
    assert_eq!(mw.activity(&id(1)), Some(Activity::Closed));
    assert_eq!(mw.active_count(), 0);
  }

  #[test]
  fn duplicate_close_is_harmless() {
    let mut mw = Registry::new();
    mw.notify_connection_opened(id(1));
    mw.notify_connection_opened(id(2));
    mw.notify_connection_closed(id(1));
    mw.notify_connection_closed(id(1));
    mw.notify_connection_closed(id(1));

    assert_eq!(mw.duplicate_closes(), 2);
    assert_eq!(mw.activity(&id(1)), Some(Activity::Closed));
    assert_eq!(mw.active().collect::<Vec<_>>(), vec![id(2)]);
  }

  #[test]
  fn unknown_close_is_ignored() {
    let mut mw = Registry::new();
    mw.notify_connection_closed(id(7));
    assert_eq!(mw.activity(&id(7)), None);
    assert_eq!(mw.duplicate_closes(), 0);
  }

  #[test]
  fn reopen_after_close() {
    let mut mw = Registry::new();
    mw.notify_connection_opened(id(1));
    mw.notify_connection_closed(id(1));
    mw.notify_connection_opened(id(1));
    assert!(mw.is_active(&id(1)));
  }

  #[test]
  fn prune_drops_closed() {
    let mut mw = Registry::new();
    mw.notify_connection_opened(id(1));
    mw.notify_connection_opened(id(2));
    mw.notify_connection_closed(id(1));
    mw.prune();
    assert_eq!(mw.activity(&id(1)), None);
    assert!(mw.is_active(&id(2)));
  }

  #[test]
  fn fair_share_in_open_order() {
    let mut mw = Registry::new();
    assert!(mw.fair_share(1000).is_empty());

    for n in 1..=3 {
      mw.notify_connection_opened(id(n));
    }
    assert_eq!(
      mw.fair_share(1000),
      vec![(id(1), 334), (id(2), 333), (id(3), 333)]
    );

    mw.notify_connection_closed(id(2));
    assert_eq!(mw.fair_share(1000), vec![(id(1), 500), (id(3), 500)]);
  }
}
