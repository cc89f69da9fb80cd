//! Host-facing sessions.
//!
//! A host drives a session once per tick: [`Session::add_local_input`] for each
//! local player, [`Session::synchronize_input`] to get every player's input,
//! advance the game, then [`Session::advance_frame`]. [`Session::poll`] must be
//! called regularly, including while idle, so network traffic is processed.

pub mod p2p;

use crate::{
    callbacks::SessionCallbacks, error::Result, player::PlayerHandle, stats::NetworkStats,
};

pub use p2p::P2PSession;
pub use sync_test::{Mismatch, SyncTestReport, SyncTestSession};

/// Operations shared by every session kind.
///
/// Operations a session kind cannot support return
/// [`RollnetError::Unsupported`](crate::error::RollnetError::Unsupported).
pub trait Session {
    /// Queues `input` for a local player for the current frame.
    fn add_local_input<C: SessionCallbacks>(
        &mut self,
        callbacks: &mut C,
        player: PlayerHandle,
        input: &[u8],
    ) -> Result<()>;

    /// Writes every player's input for the current frame into `out` and
    /// returns the disconnect flags.
    fn synchronize_input<C: SessionCallbacks>(
        &mut self,
        callbacks: &mut C,
        out: &mut [u8],
    ) -> Result<u32>;

    /// Notifies the session that the host has advanced one frame.
    fn advance_frame<C: SessionCallbacks>(&mut self, callbacks: &mut C) -> Result<()>;

    /// Processes network traffic and timers. A non-zero `timeout_ms` lets the
    /// session sleep briefly once synchronized.
    fn poll<C: SessionCallbacks>(&mut self, callbacks: &mut C, timeout_ms: u32) -> Result<()>;

    fn disconnect_player<C: SessionCallbacks>(
        &mut self,
        callbacks: &mut C,
        player: PlayerHandle,
    ) -> Result<()>;

    fn network_stats(&self, player: PlayerHandle) -> Result<NetworkStats>;

    fn set_frame_delay(&mut self, player: PlayerHandle, delay: i32) -> Result<()>;

    fn set_disconnect_timeout(&mut self, timeout_ms: u32) -> Result<()>;

    fn set_disconnect_notify_start(&mut self, timeout_ms: u32) -> Result<()>;

    /// Releases every saved state. Later calls fail with `InvalidSession`.
    fn close<C: SessionCallbacks>(&mut self, callbacks: &mut C) -> Result<()>;
}
