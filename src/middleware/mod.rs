mod registry;

pub use registry::{Activity, Registry};

use crate::ConnectionId;
use std::{cell::RefCell, rc::Rc};

/// Notifier handle shared by every controller on a host.
pub type SharedNotifier = Rc<RefCell<dyn BandwidthNotifier>>;

/// The middleware side of the bandwidth-feedback channel.
///
/// Controllers report their lifecycle here. In the other direction, whoever estimates
/// bandwidth calls [`HyblaMw::set_bandwidth`](crate::HyblaMw::set_bandwidth) on the connection.
pub trait BandwidthNotifier {
  /// Called after a connection to `id` was successfully initiated.
  ///
  /// Callers must not report the same connection as opened twice without closing it in between.
  fn notify_connection_opened(&mut self, id: ConnectionId);
  /// Called when the connection reaches a closing state and again when it is torn down.
  ///
  /// Must tolerate being called more than once for the same connection.
  fn notify_connection_closed(&mut self, id: ConnectionId);
}
