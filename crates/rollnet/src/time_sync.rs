//! Frame advantage estimator used to pace a peer that runs ahead.

use crate::input::GameInput;

pub const FRAME_WINDOW_SIZE: usize = 40;
pub const MIN_UNIQUE_FRAMES: usize = 10;
pub const MIN_FRAME_ADVANTAGE: i32 = 3;
pub const MAX_FRAME_ADVANTAGE: i32 = 9;

/// Circular averages of local and remote frame advantage.
///
/// Samples are indexed by `frame % window`, so old samples are overwritten
/// rather than shifted out.
#[derive(Debug)]
pub struct TimeSync {
    local: Vec<i32>,
    remote: Vec<i32>,
    last_inputs: Vec<Option<GameInput>>,
    min_frame_advantage: i32,
    max_frame_advantage: i32,
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new(
            FRAME_WINDOW_SIZE,
            MIN_UNIQUE_FRAMES,
            MIN_FRAME_ADVANTAGE,
            MAX_FRAME_ADVANTAGE,
        )
    }
}

impl TimeSync {
    pub fn new(
        window_size: usize,
        min_unique_frames: usize,
        min_frame_advantage: i32,
        max_frame_advantage: i32,
    ) -> Self {
        Self {
            local: vec![0; window_size.max(1)],
            remote: vec![0; window_size.max(1)],
            last_inputs: vec![None; min_unique_frames.max(1)],
            min_frame_advantage,
            max_frame_advantage,
        }
    }

    /// Records one frame's local input and both advantage samples.
    pub fn advance_frame(&mut self, input: &GameInput, advantage: i32, remote_advantage: i32) {
        let frame = input.frame.max(0) as usize;
        let inputs = self.last_inputs.len();
        let window = self.local.len();
        self.last_inputs[frame % inputs] = Some(*input);
        self.local[frame % window] = advantage;
        self.remote[frame % window] = remote_advantage;
    }

    /// Frames this peer should wait to let the remote catch up.
    ///
    /// With `require_idle_input`, a recommendation is only made while the
    /// recent local inputs are all identical.
    pub fn recommend_frame_wait_duration(&self, require_idle_input: bool) -> i32 {
        let advantage = average(&self.local);
        let remote_advantage = average(&self.remote);

        if advantage >= remote_advantage {
            return 0;
        }

        let sleep_frames = ((remote_advantage - advantage) / 2.0 + 0.5) as i32;
        if sleep_frames < self.min_frame_advantage {
            return 0;
        }

        if require_idle_input {
            let first = self.last_inputs[0].as_ref().map(GameInput::bytes);
            let idle = self.last_inputs[1..]
                .iter()
                .all(|i| i.as_ref().map(GameInput::bytes) == first);
            if !idle {
                return 0;
            }
        }

        sleep_frames.min(self.max_frame_advantage)
    }
}

fn average(samples: &[i32]) -> f32 {
    samples.iter().sum::<i32>() as f32 / samples.len() as f32
}
