use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::{error::ProtoError, messages::ensure_remaining};

/// Handshake request. The peer echoes `random_request` in a [`SyncReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub random_request: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReply {
    pub random_reply: u32,
}

impl SyncRequest {
    pub const LEN: usize = 4;

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.random_request);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure_remaining(buf, Self::LEN)?;
        Ok(Self {
            random_request: buf.get_u32_le(),
        })
    }
}

impl SyncReply {
    pub const LEN: usize = 4;

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.random_reply);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure_remaining(buf, Self::LEN)?;
        Ok(Self {
            random_reply: buf.get_u32_le(),
        })
    }
}
