//! Host callback contract.

use crate::{event::SessionEvent, input::Frame};

/// A saved simulation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameState {
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// Capabilities the session needs from the host game.
///
/// Callbacks are passed into every session call that may need them, so the
/// host never re-enters the session from inside a callback. During rollback
/// the session fetches the inputs itself and hands them to
/// [`advance_frame`](Self::advance_frame).
pub trait SessionCallbacks {
    /// Called once when the session starts.
    fn begin_game(&mut self, _name: &str) {}

    /// Serialize the current game state for `frame`.
    fn save_game_state(&mut self, frame: Frame) -> GameState;

    /// Restore a previously saved state. The session keeps ownership.
    fn load_game_state(&mut self, state: &GameState);

    /// Release a saved state. Called exactly once per saved state.
    fn free_buffer(&mut self, state: GameState) {
        drop(state);
    }

    /// Advance the game one frame using `inputs` (all players concatenated).
    /// Bit `i` of `disconnect_flags` is set when player `i` is disconnected.
    fn advance_frame(&mut self, inputs: &[u8], disconnect_flags: u32);

    fn log_game_state(&mut self, _label: &str, _state: &GameState) {}

    fn on_event(&mut self, event: &SessionEvent);
}
