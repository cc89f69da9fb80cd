//! Session error types.

use thiserror::Error;

/// Errors returned by session operations.
///
/// Each variant maps onto a stable integer code via [`RollnetError::code`].
#[derive(Error, Debug)]
pub enum RollnetError {
    #[error("session is closed")]
    InvalidSession,

    #[error("invalid player handle: {0}")]
    InvalidPlayerHandle(usize),

    #[error("player number out of range: {0}")]
    PlayerOutOfRange(usize),

    #[error("prediction threshold reached")]
    PredictionThreshold,

    #[error("operation not supported by this session")]
    Unsupported,

    #[error("session is not synchronized with all peers")]
    NotSynchronized,

    #[error("session is rolling back")]
    InRollback,

    #[error("input dropped")]
    InputDropped,

    #[error("player already disconnected")]
    PlayerDisconnected,

    #[error("too many spectators")]
    TooManySpectators,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RollnetError {
    pub const GENERAL_FAILURE: i32 = -1;

    /// Stable integer code for hosts that speak error codes.
    pub fn code(&self) -> i32 {
        match self {
            RollnetError::InvalidSession => 1,
            RollnetError::InvalidPlayerHandle(_) => 2,
            RollnetError::PlayerOutOfRange(_) => 3,
            RollnetError::PredictionThreshold => 4,
            RollnetError::Unsupported => 5,
            RollnetError::NotSynchronized => 6,
            RollnetError::InRollback => 7,
            RollnetError::InputDropped => 8,
            RollnetError::PlayerDisconnected => 9,
            RollnetError::TooManySpectators => 10,
            RollnetError::InvalidRequest(_) => 11,
            RollnetError::Io(_) => Self::GENERAL_FAILURE,
        }
    }
}

pub type Result<T, E = RollnetError> = std::result::Result<T, E>;
