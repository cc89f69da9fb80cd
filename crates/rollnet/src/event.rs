//! Events raised to the host.

use crate::player::PlayerHandle;

/// Session-level event delivered through
/// [`SessionCallbacks::on_event`](crate::callbacks::SessionCallbacks::on_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectedToPeer {
        player: PlayerHandle,
    },
    SynchronizingWithPeer {
        player: PlayerHandle,
        count: u32,
        total: u32,
    },
    SynchronizedWithPeer {
        player: PlayerHandle,
    },
    /// Every peer has finished the handshake.
    Running,
    DisconnectedFromPeer {
        player: PlayerHandle,
    },
    /// The host should stall for `frames_ahead` frames.
    TimeSync {
        frames_ahead: i32,
    },
    ConnectionInterrupted {
        player: PlayerHandle,
        disconnect_timeout_ms: u32,
    },
    ConnectionResumed {
        player: PlayerHandle,
    },
}

impl SessionEvent {
    /// Stable integer code of the event.
    pub fn code(&self) -> i32 {
        match self {
            SessionEvent::ConnectedToPeer { .. } => 1000,
            SessionEvent::SynchronizingWithPeer { .. } => 1001,
            SessionEvent::SynchronizedWithPeer { .. } => 1002,
            SessionEvent::Running => 1003,
            SessionEvent::DisconnectedFromPeer { .. } => 1004,
            SessionEvent::TimeSync { .. } => 1005,
            SessionEvent::ConnectionInterrupted { .. } => 1006,
            SessionEvent::ConnectionResumed { .. } => 1007,
        }
    }

    /// Up to three integer parameters; unused slots are zero.
    pub fn params(&self) -> [i32; 3] {
        match *self {
            SessionEvent::ConnectedToPeer { player }
            | SessionEvent::SynchronizedWithPeer { player }
            | SessionEvent::DisconnectedFromPeer { player }
            | SessionEvent::ConnectionResumed { player } => [player.0 as i32, 0, 0],
            SessionEvent::SynchronizingWithPeer {
                player,
                count,
                total,
            } => [player.0 as i32, count as i32, total as i32],
            SessionEvent::Running => [0, 0, 0],
            SessionEvent::TimeSync { frames_ahead } => [frames_ahead, 0, 0],
            SessionEvent::ConnectionInterrupted {
                player,
                disconnect_timeout_ms,
            } => [player.0 as i32, disconnect_timeout_ms as i32, 0],
        }
    }
}
