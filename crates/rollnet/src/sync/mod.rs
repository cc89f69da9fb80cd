//! Rollback core.
//!
//! [`SyncEngine`] owns one [`InputQueue`] per player and the [`SnapshotRing`].
//! It hands out (possibly predicted) inputs for the current frame, notices
//! when a prediction was wrong, and replays the game from the last good
//! snapshot.

pub mod snapshot;

use rollnet_proto::ConnectStatus;
use tracing::{debug, trace};

use crate::{
    callbacks::SessionCallbacks,
    error::{Result, RollnetError},
    input::{Frame, GameInput, NULL_FRAME},
    input_queue::InputQueue,
};

pub use snapshot::{SavedFrame, SnapshotRing};

/// Shape of the simulation the engine drives.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub num_players: usize,
    pub input_size: usize,
    pub max_prediction_frames: usize,
}

#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    queues: Vec<InputQueue>,
    saved: SnapshotRing,
    framecount: Frame,
    last_confirmed_frame: Frame,
    rolling_back: bool,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let queues = (0..config.num_players)
            .map(|i| InputQueue::new(i, config.input_size))
            .collect();
        Self {
            config,
            queues,
            saved: SnapshotRing::new(config.max_prediction_frames + 2),
            framecount: 0,
            last_confirmed_frame: NULL_FRAME,
            rolling_back: false,
        }
    }

    pub fn frame_count(&self) -> Frame {
        self.framecount
    }

    pub fn in_rollback(&self) -> bool {
        self.rolling_back
    }

    pub fn last_confirmed_frame(&self) -> Frame {
        self.last_confirmed_frame
    }

    pub fn num_players(&self) -> usize {
        self.config.num_players
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    /// Size of the combined input of all players.
    pub fn combined_input_size(&self) -> usize {
        self.config.num_players * self.config.input_size
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.saved
    }

    /// Advances the discard watermark; inputs before `frame` are released.
    pub fn set_last_confirmed_frame(&mut self, frame: Frame) {
        self.last_confirmed_frame = frame;
        if frame > 0 {
            for queue in &mut self.queues {
                queue.discard_confirmed_frames(frame - 1);
            }
        }
    }

    pub fn set_frame_delay(&mut self, queue: usize, delay: i32) {
        self.queues[queue].set_frame_delay(delay);
    }

    pub fn frame_delay(&self, queue: usize) -> i32 {
        self.queues[queue].frame_delay()
    }

    /// Queues a local input for the current frame.
    ///
    /// Returns every input the queue stored, oldest first: the input itself at
    /// its delayed frame plus any padding a raised delay inserted before it.
    /// Empty when a lowered delay dropped the input. Fails with
    /// [`RollnetError::PredictionThreshold`] once too many frames are
    /// unconfirmed.
    pub fn add_local_input(
        &mut self,
        queue: usize,
        mut input: GameInput,
        callbacks: &mut impl SessionCallbacks,
    ) -> Result<Vec<GameInput>> {
        let frames_behind = self.framecount - self.last_confirmed_frame;
        let max = self.config.max_prediction_frames as Frame;
        if self.framecount >= max && frames_behind >= max {
            debug!(
                frame = self.framecount,
                last_confirmed = self.last_confirmed_frame,
                "rejecting local input: prediction barrier reached"
            );
            return Err(RollnetError::PredictionThreshold);
        }

        self.save_initial_frame(callbacks);

        trace!(queue, frame = self.framecount, "adding local input");
        input.frame = self.framecount;
        let previous = self.queues[queue].last_added_frame();
        if self.queues[queue].add_input(input) == NULL_FRAME {
            return Ok(Vec::new());
        }
        Ok(self.queues[queue].inputs_after(previous))
    }

    /// Queues an input received from the network (already frame-stamped).
    pub fn add_remote_input(&mut self, queue: usize, input: GameInput) {
        self.queues[queue].add_input(input);
    }

    /// Saves frame 0 if nothing has been saved for it yet.
    pub fn save_initial_frame(&mut self, callbacks: &mut impl SessionCallbacks) {
        if self.framecount == 0 && !self.saved.contains(0) {
            self.save_current_frame(callbacks);
        }
    }

    /// Writes every player's input for the current frame into `out`.
    ///
    /// Players disconnected before the current frame get zero input and their
    /// bit set in the returned flags.
    pub fn synchronize_inputs(&mut self, connect_status: &[ConnectStatus], out: &mut [u8]) -> u32 {
        let size = self.config.input_size;
        assert!(
            out.len() >= self.combined_input_size(),
            "input buffer too small"
        );
        out.fill(0);

        let mut disconnect_flags = 0;
        for (i, queue) in self.queues.iter_mut().enumerate() {
            let status = connect_status[i];
            if status.disconnected && self.framecount > status.last_frame {
                disconnect_flags |= 1 << i;
            } else {
                let (input, _) = queue.input(self.framecount);
                out[i * size..(i + 1) * size].copy_from_slice(input.bytes());
            }
        }
        disconnect_flags
    }

    /// Combined confirmed input of all players for `frame`.
    ///
    /// Returns `None` when some connected player's input for `frame` is not
    /// confirmed (or already discarded).
    pub fn confirmed_inputs(
        &self,
        frame: Frame,
        connect_status: &[ConnectStatus],
    ) -> Option<(GameInput, u32)> {
        let size = self.config.input_size;
        let mut combined = GameInput::blank(frame, self.combined_input_size());
        let mut disconnect_flags = 0;
        for (i, queue) in self.queues.iter().enumerate() {
            let status = connect_status[i];
            if status.disconnected && frame > status.last_frame {
                disconnect_flags |= 1 << i;
            } else {
                let input = queue.confirmed_input(frame)?;
                combined.bytes_mut()[i * size..(i + 1) * size].copy_from_slice(input.bytes());
            }
        }
        Some((combined, disconnect_flags))
    }

    /// Earliest mispredicted frame across all queues.
    pub fn first_incorrect_frame(&self) -> Option<Frame> {
        self.queues
            .iter()
            .map(InputQueue::first_incorrect_frame)
            .filter(|&f| f != NULL_FRAME)
            .min()
    }

    /// Rolls back and replays if any prediction turned out wrong.
    pub fn check_simulation(
        &mut self,
        connect_status: &[ConnectStatus],
        callbacks: &mut impl SessionCallbacks,
    ) {
        if let Some(seek_to) = self.first_incorrect_frame() {
            debug!(seek_to, frame = self.framecount, "prediction failed");
            self.adjust_simulation(seek_to, connect_status, callbacks);
        }
    }

    /// Loads the snapshot of `seek_to` and replays up to the current frame.
    ///
    /// Panics if `seek_to` is no longer in the snapshot ring.
    pub fn adjust_simulation(
        &mut self,
        seek_to: Frame,
        connect_status: &[ConnectStatus],
        callbacks: &mut impl SessionCallbacks,
    ) {
        let framecount = self.framecount;
        let count = self.framecount - seek_to;
        debug!(seek_to, count, "rolling back");
        self.rolling_back = true;

        self.load_frame(seek_to, callbacks);
        assert_eq!(self.framecount, seek_to);

        self.reset_prediction(self.framecount);
        let mut inputs = vec![0u8; self.combined_input_size()];
        for _ in 0..count {
            let flags = self.synchronize_inputs(connect_status, &mut inputs);
            callbacks.advance_frame(&inputs, flags);
            self.increment_frame(callbacks);
        }
        assert_eq!(self.framecount, framecount, "replay did not return to frame");

        self.rolling_back = false;
    }

    pub fn increment_frame(&mut self, callbacks: &mut impl SessionCallbacks) {
        self.framecount += 1;
        self.save_current_frame(callbacks);
    }

    /// Restores the snapshot of `frame`. No-op for the current frame.
    pub fn load_frame(&mut self, frame: Frame, callbacks: &mut impl SessionCallbacks) {
        if frame == self.framecount {
            trace!(frame, "skipping load of current frame");
            return;
        }
        let Some(saved) = self.saved.rewind_to(frame) else {
            panic!("frame {frame} is not in the snapshot ring");
        };
        let Some(state) = saved.state.as_ref() else {
            panic!("frame {frame} has no saved state");
        };
        trace!(frame, checksum = state.checksum, "loading frame");
        callbacks.load_game_state(state);
        self.framecount = frame;
    }

    pub fn save_current_frame(&mut self, callbacks: &mut impl SessionCallbacks) {
        if let Some(old) = self.saved.evict_head() {
            callbacks.free_buffer(old);
        }
        let state = callbacks.save_game_state(self.framecount);
        trace!(frame = self.framecount, checksum = state.checksum, "saved frame");
        self.saved.store(self.framecount, state);
    }

    pub fn last_saved_frame(&self) -> &SavedFrame {
        self.saved.last_saved()
    }

    /// Releases every saved state.
    pub fn free_snapshots(&mut self, callbacks: &mut impl SessionCallbacks) {
        for state in self.saved.drain() {
            callbacks.free_buffer(state);
        }
    }

    fn reset_prediction(&mut self, frame: Frame) {
        for queue in &mut self.queues {
            queue.reset_prediction(frame);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{callbacks::GameState, event::SessionEvent};

    /// Sums every input byte into a running total.
    #[derive(Default)]
    pub(crate) struct SumGame {
        pub total: u32,
        pub frame: Frame,
        pub advances: usize,
        pub freed: usize,
        pub saved: usize,
        pub events: Vec<SessionEvent>,
    }

    impl SessionCallbacks for SumGame {
        fn save_game_state(&mut self, frame: Frame) -> GameState {
            assert_eq!(frame, self.frame);
            self.saved += 1;
            let mut data = self.total.to_le_bytes().to_vec();
            data.extend_from_slice(&self.frame.to_le_bytes());
            GameState {
                data,
                checksum: self.total,
            }
        }

        fn load_game_state(&mut self, state: &GameState) {
            self.total = u32::from_le_bytes(state.data[0..4].try_into().unwrap());
            self.frame = i32::from_le_bytes(state.data[4..8].try_into().unwrap());
        }

        fn free_buffer(&mut self, _state: GameState) {
            self.freed += 1;
        }

        fn advance_frame(&mut self, inputs: &[u8], _disconnect_flags: u32) {
            self.total = self
                .total
                .wrapping_mul(31)
                .wrapping_add(inputs.iter().map(|&b| b as u32).sum::<u32>());
            self.frame += 1;
            self.advances += 1;
        }

        fn on_event(&mut self, event: &SessionEvent) {
            self.events.push(*event);
        }
    }

    fn engine(players: usize) -> SyncEngine {
        SyncEngine::new(SyncConfig {
            num_players: players,
            input_size: 1,
            max_prediction_frames: 8,
        })
    }

    fn status(n: usize) -> Vec<ConnectStatus> {
        vec![ConnectStatus::default(); n]
    }

    /// One host frame: local input, synchronize, advance, increment.
    fn step(sync: &mut SyncEngine, game: &mut SumGame, local: u8, status: &[ConnectStatus]) {
        let input = GameInput::new(NULL_FRAME, Some(&[local]), 1);
        sync.add_local_input(0, input, game).unwrap();
        let mut buf = vec![0u8; sync.combined_input_size()];
        let flags = sync.synchronize_inputs(status, &mut buf);
        game.advance_frame(&buf, flags);
        sync.increment_frame(game);
    }

    #[test]
    fn prediction_barrier_rejects_input() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        let st = status(2);
        for _ in 0..8 {
            step(&mut sync, &mut game, 1, &st);
        }
        let input = GameInput::blank(NULL_FRAME, 1);
        assert!(matches!(
            sync.add_local_input(0, input, &mut game),
            Err(RollnetError::PredictionThreshold)
        ));

        sync.set_last_confirmed_frame(4);
        assert!(sync.add_local_input(0, input, &mut game).is_ok());
    }

    #[test]
    fn raised_delay_returns_padding_frames() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        let st = status(2);
        for _ in 0..3 {
            step(&mut sync, &mut game, 5, &st);
        }

        sync.set_frame_delay(0, 2);
        let stored = sync
            .add_local_input(0, GameInput::new(NULL_FRAME, Some(&[6]), 1), &mut game)
            .unwrap();
        let frames: Vec<(Frame, u8)> = stored.iter().map(|i| (i.frame, i.bytes()[0])).collect();
        assert_eq!(frames, vec![(3, 5), (4, 5), (5, 6)]);
    }

    #[test]
    fn lowered_delay_drops_input() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        sync.set_frame_delay(0, 1);
        let first = sync
            .add_local_input(0, GameInput::new(NULL_FRAME, Some(&[1]), 1), &mut game)
            .unwrap();
        assert_eq!(first.iter().map(|i| i.frame).collect::<Vec<_>>(), vec![0, 1]);

        let mut buf = [0u8; 2];
        let flags = sync.synchronize_inputs(&status(2), &mut buf);
        game.advance_frame(&buf, flags);
        sync.increment_frame(&mut game);
        sync.set_frame_delay(0, 0);
        let dropped = sync
            .add_local_input(0, GameInput::new(NULL_FRAME, Some(&[2]), 1), &mut game)
            .unwrap();
        assert!(dropped.is_empty());
    }

    #[test]
    fn misprediction_rolls_back_and_replays() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        let st = status(2);

        // Remote player predicted as zero for frames 0..6.
        for _ in 0..6 {
            step(&mut sync, &mut game, 1, &st);
        }
        assert_eq!(sync.frame_count(), 6);

        for f in 0..3 {
            sync.add_remote_input(1, GameInput::new(f, Some(&[0]), 1));
        }
        assert_eq!(sync.first_incorrect_frame(), None);
        sync.add_remote_input(1, GameInput::new(3, Some(&[5]), 1));
        assert_eq!(sync.first_incorrect_frame(), Some(3));

        let advances = game.advances;
        sync.check_simulation(&st, &mut game);
        assert_eq!(sync.frame_count(), 6);
        assert_eq!(game.advances, advances + 3);
        assert!(!sync.in_rollback());
        assert_eq!(sync.first_incorrect_frame(), None);

        // Same result as simulating the true inputs from scratch.
        let mut reference = SumGame::default();
        for f in 0..6 {
            let remote = if f >= 3 { 5 } else { 0 };
            reference.advance_frame(&[1, remote], 0);
        }
        assert_eq!(game.total, reference.total);
    }

    #[test]
    fn replay_reproduces_saved_checksums() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        let st = status(2);
        for f in 0..5 {
            sync.add_remote_input(1, GameInput::new(f, Some(&[2]), 1));
        }
        for _ in 0..5 {
            step(&mut sync, &mut game, 3, &st);
        }
        let before: Vec<_> = (1..=5)
            .map(|f| sync.snapshots().get(f).and_then(SavedFrame::checksum))
            .collect();

        sync.adjust_simulation(1, &st, &mut game);
        let after: Vec<_> = (1..=5)
            .map(|f| sync.snapshots().get(f).and_then(SavedFrame::checksum))
            .collect();
        assert_eq!(before, after);
        assert_eq!(sync.frame_count(), 5);
    }

    #[test]
    fn disconnected_player_gets_zero_input() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        let mut st = status(2);
        st[1] = ConnectStatus {
            disconnected: true,
            last_frame: -1,
        };
        sync.add_local_input(0, GameInput::new(NULL_FRAME, Some(&[4]), 1), &mut game)
            .unwrap();
        let mut buf = [0xFFu8; 2];
        let flags = sync.synchronize_inputs(&st, &mut buf);
        assert_eq!(flags, 0b10);
        assert_eq!(buf, [4, 0]);
    }

    #[test]
    fn confirmed_inputs_combine_players() {
        let mut sync = engine(2);
        let mut game = SumGame::default();
        let st = status(2);
        sync.add_local_input(0, GameInput::new(NULL_FRAME, Some(&[7]), 1), &mut game)
            .unwrap();
        assert!(sync.confirmed_inputs(0, &st).is_none());
        sync.add_remote_input(1, GameInput::new(0, Some(&[9]), 1));
        let (combined, flags) = sync.confirmed_inputs(0, &st).unwrap();
        assert_eq!(combined.bytes(), &[7, 9]);
        assert_eq!(combined.frame, 0);
        assert_eq!(flags, 0);
    }

    #[test]
    fn every_saved_state_is_freed_once() {
        let mut sync = engine(1);
        let mut game = SumGame::default();
        let st = status(1);
        for _ in 0..30 {
            step(&mut sync, &mut game, 1, &st);
            sync.set_last_confirmed_frame(sync.frame_count());
        }
        sync.free_snapshots(&mut game);
        assert_eq!(game.freed, game.saved);
        assert!(sync.snapshots().is_empty());
    }

    #[test]
    fn load_of_current_frame_is_noop() {
        let mut sync = engine(1);
        let mut game = SumGame::default();
        sync.save_initial_frame(&mut game);
        game.total = 99;
        sync.load_frame(0, &mut game);
        assert_eq!(game.total, 99);
    }

    #[test]
    #[should_panic]
    fn rollback_past_ring_panics() {
        let mut sync = engine(1);
        let mut game = SumGame::default();
        let st = status(1);
        for _ in 0..20 {
            step(&mut sync, &mut game, 1, &st);
            sync.set_last_confirmed_frame(sync.frame_count());
        }
        sync.adjust_simulation(2, &st, &mut game);
    }
}
