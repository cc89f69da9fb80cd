use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle returned by `add_player`.
///
/// Players get their 1-based player number; spectators start at
/// [`PlayerHandle::FIRST_SPECTATOR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerHandle(pub usize);

impl PlayerHandle {
    pub const FIRST_SPECTATOR: usize = 1000;

    pub(crate) fn from_queue(queue: usize) -> Self {
        Self(queue + 1)
    }

    pub(crate) fn from_spectator(index: usize) -> Self {
        Self(Self::FIRST_SPECTATOR + index)
    }

    pub fn is_spectator(self) -> bool {
        self.0 >= Self::FIRST_SPECTATOR
    }
}

impl fmt::Display for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of participant, carrying the remote address where one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerType<A> {
    Local,
    Remote(A),
    Spectator(A),
}
