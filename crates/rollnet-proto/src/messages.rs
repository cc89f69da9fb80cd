//! Message bodies carried after the [`Header`](crate::header::Header).

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::{
    constants::CONNECT_STATUS_LEN, error::ProtoError, header::Header, msg_type::MsgType,
};

pub mod handshake;
pub mod input;
pub mod quality;

pub use handshake::{SyncReply, SyncRequest};
pub use input::InputMsg;
pub use quality::{QualityReply, QualityReport};

/// Per-player connection status as seen by one peer.
///
/// `last_frame` is the last frame of that player's input the peer has; `-1`
/// when none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectStatus {
    pub disconnected: bool,
    pub last_frame: i32,
}

impl Default for ConnectStatus {
    fn default() -> Self {
        Self {
            disconnected: false,
            last_frame: -1,
        }
    }
}

impl ConnectStatus {
    pub const LEN: usize = CONNECT_STATUS_LEN;

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(u8::from(self.disconnected));
        out.put_i32_le(self.last_frame);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure_remaining(buf, Self::LEN)?;
        Ok(Self {
            disconnected: buf.get_u8() != 0,
            last_frame: buf.get_i32_le(),
        })
    }
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    SyncRequest(SyncRequest),
    SyncReply(SyncReply),
    Input(InputMsg),
    QualityReport(QualityReport),
    QualityReply(QualityReply),
    KeepAlive,
}

impl MessageBody {
    pub fn msg_type(&self) -> MsgType {
        match self {
            MessageBody::SyncRequest(_) => MsgType::SyncRequest,
            MessageBody::SyncReply(_) => MsgType::SyncReply,
            MessageBody::Input(_) => MsgType::Input,
            MessageBody::QualityReport(_) => MsgType::QualityReport,
            MessageBody::QualityReply(_) => MsgType::QualityReply,
            MessageBody::KeepAlive => MsgType::KeepAlive,
        }
    }

    /// Encoded body length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            MessageBody::SyncRequest(_) => SyncRequest::LEN,
            MessageBody::SyncReply(_) => SyncReply::LEN,
            MessageBody::Input(msg) => msg.encoded_len(),
            MessageBody::QualityReport(_) => QualityReport::LEN,
            MessageBody::QualityReply(_) => QualityReply::LEN,
            MessageBody::KeepAlive => 0,
        }
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        match self {
            MessageBody::SyncRequest(m) => m.encode(out),
            MessageBody::SyncReply(m) => m.encode(out),
            MessageBody::Input(m) => m.encode(out),
            MessageBody::QualityReport(m) => m.encode(out),
            MessageBody::QualityReply(m) => m.encode(out),
            MessageBody::KeepAlive => {}
        }
    }

    pub(crate) fn decode(msg_type: MsgType, buf: &mut impl Buf) -> Result<Self, ProtoError> {
        Ok(match msg_type {
            MsgType::SyncRequest => MessageBody::SyncRequest(SyncRequest::decode(buf)?),
            MsgType::SyncReply => MessageBody::SyncReply(SyncReply::decode(buf)?),
            MsgType::Input => MessageBody::Input(InputMsg::decode(buf)?),
            MsgType::QualityReport => MessageBody::QualityReport(QualityReport::decode(buf)?),
            MsgType::QualityReply => MessageBody::QualityReply(QualityReply::decode(buf)?),
            MsgType::KeepAlive => MessageBody::KeepAlive,
        })
    }
}

/// A full datagram: header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpMessage {
    pub header: Header,
    pub body: MessageBody,
}

impl UdpMessage {
    /// Builds a message with the header type filled in from the body.
    pub fn new(body: MessageBody) -> Self {
        Self {
            header: Header::new(body.msg_type() as u8),
            body,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        self.body.msg_type()
    }

    /// Encoded datagram length in bytes.
    pub fn encoded_len(&self) -> usize {
        Header::LEN + self.body.encoded_len()
    }
}

pub(crate) fn ensure_remaining(buf: &impl Buf, len: usize) -> Result<(), ProtoError> {
    if buf.remaining() < len {
        return Err(ProtoError::TooShort);
    }
    Ok(())
}
