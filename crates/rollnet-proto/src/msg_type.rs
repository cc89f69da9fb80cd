use strum::FromRepr;

/// Message type tag carried in [`Header::msg_type`](crate::header::Header).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum MsgType {
    SyncRequest = 1,
    SyncReply = 2,
    Input = 3,
    QualityReport = 4,
    QualityReply = 5,
    KeepAlive = 6,
}

impl MsgType {
    /// Handshake messages are accepted before the remote magic number is latched.
    pub const fn is_handshake(self) -> bool {
        matches!(self, MsgType::SyncRequest | MsgType::SyncReply)
    }
}
