use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::{error::ProtoError, messages::ensure_remaining};

/// Periodic link quality report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Sender's clock in milliseconds, echoed back as `pong`.
    pub ping: u32,
    /// Sender's local frame advantage, saturated to `i8`.
    pub frame_advantage: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReply {
    pub pong: u32,
}

impl QualityReport {
    pub const LEN: usize = 5;

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.ping);
        out.put_i8(self.frame_advantage);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure_remaining(buf, Self::LEN)?;
        Ok(Self {
            ping: buf.get_u32_le(),
            frame_advantage: buf.get_i8(),
        })
    }
}

impl QualityReply {
    pub const LEN: usize = 4;

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.pong);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure_remaining(buf, Self::LEN)?;
        Ok(Self {
            pong: buf.get_u32_le(),
        })
    }
}
