use std::io;

use thiserror::Error;

use mooc_core::{FrameEncodeError, ProtocolError, StateError};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("discovery is not running")]
    NotRunning,
    #[error("discovery is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Frame(#[from] FrameEncodeError),
    #[error(transparent)]
    State(#[from] StateError),
}
