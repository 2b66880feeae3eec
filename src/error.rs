use crate::tcp::TcpState;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("IO error: {0}")]
  Io(#[from] io::Error),
  #[error("Operation not valid in state {0:?}")]
  InvalidState(TcpState),
}

pub type Result<T> = std::result::Result<T, Error>;
