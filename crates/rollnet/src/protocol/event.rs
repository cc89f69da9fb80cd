use crate::input::GameInput;

/// Event raised by a [`PeerProtocol`](super::PeerProtocol) for its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// First handshake reply received.
    Connected,
    Synchronizing { count: u32, total: u32 },
    Synchronized,
    /// A remote input, in frame order.
    Input(GameInput),
    Disconnected,
    NetworkInterrupted { disconnect_timeout_ms: u32 },
    NetworkResumed,
}
