//! Snapshot ring for rollback.
//!
//! Holds the most recent saved game states, one slot per frame, overwritten
//! in rotation.

use crate::{
    callbacks::GameState,
    input::{Frame, NULL_FRAME},
};

/// A saved state tagged with its frame.
#[derive(Debug, Clone)]
pub struct SavedFrame {
    pub frame: Frame,
    pub state: Option<GameState>,
}

impl Default for SavedFrame {
    fn default() -> Self {
        Self {
            frame: NULL_FRAME,
            state: None,
        }
    }
}

impl SavedFrame {
    pub fn checksum(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.checksum)
    }
}

/// Fixed ring of saved frames with a rotating write head.
#[derive(Debug)]
pub struct SnapshotRing {
    frames: Vec<SavedFrame>,
    head: usize,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: vec![SavedFrame::default(); capacity.max(1)],
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Empties the slot under the write head, returning the state it held.
    pub fn evict_head(&mut self) -> Option<GameState> {
        let slot = &mut self.frames[self.head];
        slot.frame = NULL_FRAME;
        slot.state.take()
    }

    /// Stores `state` under the write head and advances it.
    ///
    /// Call [`evict_head`](Self::evict_head) first so the previous state can
    /// be released.
    pub fn store(&mut self, frame: Frame, state: GameState) {
        let slot = &mut self.frames[self.head];
        debug_assert!(slot.state.is_none());
        slot.frame = frame;
        slot.state = Some(state);
        self.head = (self.head + 1) % self.frames.len();
    }

    pub fn find_index(&self, frame: Frame) -> Option<usize> {
        self.frames
            .iter()
            .position(|s| s.frame == frame && s.state.is_some())
    }

    pub fn contains(&self, frame: Frame) -> bool {
        self.find_index(frame).is_some()
    }

    pub fn get(&self, frame: Frame) -> Option<&SavedFrame> {
        self.find_index(frame).map(|i| &self.frames[i])
    }

    /// Looks up `frame` and moves the write head just past it, so the frames
    /// that follow are overwritten on the next saves.
    pub fn rewind_to(&mut self, frame: Frame) -> Option<&SavedFrame> {
        let index = self.find_index(frame)?;
        self.head = (index + 1) % self.frames.len();
        Some(&self.frames[index])
    }

    /// The most recently stored frame.
    pub fn last_saved(&self) -> &SavedFrame {
        let i = if self.head == 0 {
            self.frames.len() - 1
        } else {
            self.head - 1
        };
        &self.frames[i]
    }

    /// Takes every stored state out of the ring.
    pub fn drain(&mut self) -> impl Iterator<Item = GameState> + '_ {
        self.head = 0;
        self.frames.iter_mut().filter_map(|s| {
            s.frame = NULL_FRAME;
            s.state.take()
        })
    }

    pub fn len(&self) -> usize {
        self.frames.iter().filter(|s| s.state.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
