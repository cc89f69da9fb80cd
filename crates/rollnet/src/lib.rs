//! Peer-to-peer rollback networking.
//!
//! Every peer simulates every frame immediately, predicting remote inputs it
//! has not received yet. When the real inputs arrive and differ from the
//! prediction, the session reloads the last correct snapshot and replays the
//! frames since, so all peers converge on the same state without waiting on
//! the network.
//!
//! # Architecture
//!
//! - [`input`] / [`input_queue`]: framed inputs and the per-player queue that
//!   applies frame delay, predicts, and tracks mispredictions
//! - [`time_sync`]: frame-advantage statistics used to recommend stalls
//! - [`protocol`]: per-peer handshake, input exchange, and liveness
//! - [`sync`]: the rollback engine and its snapshot ring
//! - [`session`]: the host-facing [`P2PSession`] and [`SyncTestSession`]
//! - [`transport`]: non-blocking datagram sockets (UDP and in-memory)
//! - [`callbacks`]: what the host game provides
//! - [`error`]: error types

pub mod callbacks;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod input;
pub mod input_queue;
pub mod player;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod sync;
pub mod time_sync;
pub mod transport;

// Re-export commonly used types
pub use callbacks::{GameState, SessionCallbacks};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{NetworkConditions, SessionConfig, SyncTestConfig};
pub use error::{Result, RollnetError};
pub use event::SessionEvent;
pub use input::{Frame, GameInput, NULL_FRAME};
pub use player::{PlayerHandle, PlayerType};
pub use rollnet_proto::constants::{MAX_INPUT_BYTES, MAX_PLAYERS};
pub use session::{Mismatch, P2PSession, Session, SyncTestReport, SyncTestSession};
pub use stats::NetworkStats;
pub use transport::{MemoryAddr, MemoryNetwork, MemorySocket, NonBlockingSocket, UdpNonBlockingSocket};
