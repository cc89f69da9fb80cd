use thiserror::Error;

use crate::bitvector::BitError;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("buffer too short")]
    TooShort,
    #[error("unknown msg type: {0}")]
    UnknownMsgType(u8),
    #[error("payload length mismatch")]
    LengthMismatch,
    #[error("datagram too large: {0}")]
    DatagramTooLarge(usize),
    #[error("too many compressed bits: {0}")]
    TooManyBits(usize),
    #[error("input size out of range: {0}")]
    InputSize(usize),
    #[error("bit stream error: {0}")]
    BitStream(#[from] BitError),
}
