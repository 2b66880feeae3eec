/// Connection lifecycle, in the order the baseline stack numbers them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
  #[default]
  Closed,
  Listen,
  SynSent,
  SynRcvd,
  Established,
  CloseWait,
  LastAck,
  FinWait1,
  FinWait2,
  Closing,
  TimeWait,
}

impl TcpState {
  /// Either side has started tearing the connection down.
  ///
  /// `Closed` is not part of this set: a socket that never connected is also `Closed`.
  pub fn is_closing_or_later(self) -> bool {
    use TcpState::*;
    matches!(
      self,
      CloseWait | LastAck | FinWait1 | FinWait2 | Closing | TimeWait
    )
  }

  /// States in which queued data may still be transmitted.
  pub fn can_send_data(self) -> bool {
    matches!(self, TcpState::Established | TcpState::CloseWait)
  }
}
