//! Per-player input ring with frame delay and prediction.

use tracing::trace;

use crate::input::{Frame, GameInput, NULL_FRAME};

/// Capacity of each player's input ring.
pub const INPUT_QUEUE_LENGTH: usize = 128;

/// Ring buffer of one player's inputs.
///
/// Entries between `tail` and `head` form a contiguous run of confirmed frames.
/// When a frame past the run is requested, the queue predicts it by repeating
/// the newest entry and remembers the prediction until real input arrives.
#[derive(Debug)]
pub struct InputQueue {
    id: usize,
    head: usize,
    tail: usize,
    length: usize,
    first_frame: bool,
    input_size: usize,

    last_user_added_frame: Frame,
    last_added_frame: Frame,
    first_incorrect_frame: Frame,
    last_frame_requested: Frame,

    frame_delay: i32,

    inputs: Vec<GameInput>,
    prediction: GameInput,
}

impl InputQueue {
    pub fn new(id: usize, input_size: usize) -> Self {
        Self {
            id,
            head: 0,
            tail: 0,
            length: 0,
            first_frame: true,
            input_size,
            last_user_added_frame: NULL_FRAME,
            last_added_frame: NULL_FRAME,
            first_incorrect_frame: NULL_FRAME,
            last_frame_requested: NULL_FRAME,
            frame_delay: 0,
            inputs: vec![GameInput::blank(NULL_FRAME, input_size); INPUT_QUEUE_LENGTH],
            prediction: GameInput::blank(NULL_FRAME, input_size),
        }
    }

    /// Earliest frame whose prediction was contradicted, or [`NULL_FRAME`].
    pub fn first_incorrect_frame(&self) -> Frame {
        self.first_incorrect_frame
    }

    /// Newest frame in the ring, or [`NULL_FRAME`].
    pub fn last_added_frame(&self) -> Frame {
        self.last_added_frame
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn frame_delay(&self) -> i32 {
        self.frame_delay
    }

    pub fn set_frame_delay(&mut self, delay: i32) {
        self.frame_delay = delay.max(0);
    }

    /// Clears prediction state so frames from `frame` on are predicted afresh.
    pub fn reset_prediction(&mut self, frame: Frame) {
        assert!(
            self.first_incorrect_frame == NULL_FRAME || frame <= self.first_incorrect_frame,
            "queue {}: resetting prediction at {frame} past incorrect frame {}",
            self.id,
            self.first_incorrect_frame
        );
        trace!(queue = self.id, frame, "resetting prediction");
        self.prediction.frame = NULL_FRAME;
        self.first_incorrect_frame = NULL_FRAME;
        self.last_frame_requested = NULL_FRAME;
    }

    /// Drops confirmed entries up to and including `frame`.
    ///
    /// Never drops past the last requested frame.
    pub fn discard_confirmed_frames(&mut self, frame: Frame) {
        assert!(frame >= 0, "queue {}: discarding negative frame", self.id);
        let mut frame = frame;
        if self.last_frame_requested != NULL_FRAME {
            frame = frame.min(self.last_frame_requested);
        }

        trace!(
            queue = self.id,
            frame,
            last_added = self.last_added_frame,
            length = self.length,
            "discarding confirmed frames"
        );
        if self.length == 0 {
            return;
        }
        if frame >= self.last_added_frame {
            self.tail = self.head;
            self.length = 0;
        } else {
            let offset = frame - self.inputs[self.tail].frame + 1;
            if offset <= 0 {
                return;
            }
            let offset = offset as usize;
            assert!(offset <= self.length, "queue {}: discard past head", self.id);
            self.tail = (self.tail + offset) % INPUT_QUEUE_LENGTH;
            self.length -= offset;
        }
    }

    /// Returns the input for `requested_frame` and whether it is confirmed.
    ///
    /// Unconfirmed results are predictions carrying `requested_frame` as frame.
    pub fn input(&mut self, requested_frame: Frame) -> (GameInput, bool) {
        assert!(
            self.first_incorrect_frame == NULL_FRAME,
            "queue {}: requesting input with unresolved misprediction at {}",
            self.id,
            self.first_incorrect_frame
        );
        self.last_frame_requested = requested_frame;

        if self.prediction.frame == NULL_FRAME {
            if let Some(input) = self.confirmed(requested_frame) {
                return (input, true);
            }

            if requested_frame == 0 || self.last_added_frame == NULL_FRAME {
                trace!(queue = self.id, "predicting from empty input");
                self.prediction.erase();
            } else {
                self.prediction = self.inputs[previous(self.head)];
            }
            self.prediction.frame += 1;
        }

        assert!(self.prediction.frame >= 0);
        let mut input = self.prediction;
        input.frame = requested_frame;
        (input, false)
    }

    /// Confirmed input for `frame` if it is still in the ring.
    pub fn confirmed_input(&self, frame: Frame) -> Option<GameInput> {
        assert!(
            self.first_incorrect_frame == NULL_FRAME || frame < self.first_incorrect_frame,
            "queue {}: confirmed input requested past misprediction",
            self.id
        );
        self.confirmed(frame)
    }

    /// Inputs stored after `frame`, oldest first, padding frames included.
    pub fn inputs_after(&self, frame: Frame) -> Vec<GameInput> {
        (frame + 1..=self.last_added_frame)
            .filter_map(|f| self.confirmed(f))
            .collect()
    }

    fn confirmed(&self, frame: Frame) -> Option<GameInput> {
        if self.length == 0 {
            return None;
        }
        let tail_frame = self.inputs[self.tail].frame;
        if frame < tail_frame {
            return None;
        }
        let offset = (frame - tail_frame) as usize;
        if offset >= self.length {
            return None;
        }
        let input = self.inputs[(self.tail + offset) % INPUT_QUEUE_LENGTH];
        assert_eq!(input.frame, frame, "queue {}: ring out of order", self.id);
        Some(input)
    }

    /// Adds the next user input, applying the frame delay.
    ///
    /// Returns the frame the input was stored at, or [`NULL_FRAME`] when the
    /// delay made it stale and it was dropped.
    pub fn add_input(&mut self, input: GameInput) -> Frame {
        assert!(
            self.last_user_added_frame == NULL_FRAME
                || input.frame == self.last_user_added_frame + 1,
            "queue {}: non-sequential input {} after {}",
            self.id,
            input.frame,
            self.last_user_added_frame
        );
        self.last_user_added_frame = input.frame;

        let new_frame = self.advance_queue_head(input.frame);
        if new_frame != NULL_FRAME {
            self.add_delayed_input(&input, new_frame);
        }
        new_frame
    }

    fn advance_queue_head(&mut self, frame: Frame) -> Frame {
        let mut expected_frame = if self.first_frame {
            0
        } else {
            self.inputs[previous(self.head)].frame + 1
        };

        let frame = frame + self.frame_delay;
        if expected_frame > frame {
            trace!(queue = self.id, frame, expected_frame, "dropping stale input");
            return NULL_FRAME;
        }

        while expected_frame < frame {
            trace!(queue = self.id, frame = expected_frame, "adding padding frame");
            let last = if self.first_frame {
                GameInput::blank(NULL_FRAME, self.input_size)
            } else {
                self.inputs[previous(self.head)]
            };
            self.add_delayed_input(&last, expected_frame);
            expected_frame += 1;
        }

        frame
    }

    fn add_delayed_input(&mut self, input: &GameInput, frame: Frame) {
        assert_eq!(input.size(), self.input_size, "queue {}: size mismatch", self.id);
        assert!(
            self.last_added_frame == NULL_FRAME || frame == self.last_added_frame + 1,
            "queue {}: gap inserting frame {frame} after {}",
            self.id,
            self.last_added_frame
        );
        assert!(self.length < INPUT_QUEUE_LENGTH, "queue {}: ring overflow", self.id);

        let mut stored = *input;
        stored.frame = frame;
        self.inputs[self.head] = stored;
        self.head = (self.head + 1) % INPUT_QUEUE_LENGTH;
        self.length += 1;
        self.first_frame = false;
        self.last_added_frame = frame;

        if self.prediction.frame != NULL_FRAME {
            assert_eq!(
                frame, self.prediction.frame,
                "queue {}: input does not line up with prediction",
                self.id
            );

            if self.first_incorrect_frame == NULL_FRAME && !self.prediction.equal(input, true) {
                trace!(queue = self.id, frame, "prediction was wrong");
                self.first_incorrect_frame = frame;
            }

            if self.prediction.frame == self.last_frame_requested
                && self.first_incorrect_frame == NULL_FRAME
            {
                trace!(queue = self.id, "prediction confirmed, leaving prediction mode");
                self.prediction.frame = NULL_FRAME;
            } else {
                self.prediction.frame += 1;
            }
        }
    }
}

fn previous(offset: usize) -> usize {
    if offset == 0 {
        INPUT_QUEUE_LENGTH - 1
    } else {
        offset - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(frame: Frame, byte: u8) -> GameInput {
        GameInput::new(frame, Some(&[byte]), 1)
    }

    #[test]
    fn frames_are_shifted_by_delay() {
        let mut q = InputQueue::new(0, 1);
        q.set_frame_delay(2);
        for f in 0..10 {
            assert_eq!(q.add_input(input(f, f as u8)), f + 2);
        }
        // Two leading padding frames plus the ten real ones.
        assert_eq!(q.len(), 12);
        assert_eq!(q.input(0), (GameInput::blank(0, 1), true));
        assert_eq!(q.input(2).0.bytes(), &[0]);
        assert_eq!(q.input(5).0.bytes(), &[3]);
    }

    #[test]
    fn increasing_delay_pads_with_previous_input() {
        let mut q = InputQueue::new(0, 1);
        for f in 0..3 {
            assert_eq!(q.add_input(input(f, 7)), f);
        }
        q.set_frame_delay(3);
        assert_eq!(q.add_input(input(3, 9)), 6);
        let stored: Vec<(Frame, u8)> = q
            .inputs_after(2)
            .iter()
            .map(|i| (i.frame, i.bytes()[0]))
            .collect();
        assert_eq!(stored, vec![(3, 7), (4, 7), (5, 7), (6, 9)]);
        assert_eq!(q.last_added_frame(), 6);
        assert_eq!(q.len(), 7);
        for f in 3..6 {
            let (padded, confirmed) = q.input(f);
            assert!(confirmed);
            assert_eq!(padded.frame, f);
            assert_eq!(padded.bytes(), &[7]);
        }
        assert_eq!(q.input(6).0.bytes(), &[9]);
    }

    #[test]
    fn decreasing_delay_drops_stale_inputs() {
        let mut q = InputQueue::new(0, 1);
        q.set_frame_delay(2);
        assert_eq!(q.add_input(input(0, 1)), 2);
        q.set_frame_delay(0);
        assert_eq!(q.add_input(input(1, 1)), NULL_FRAME);
        assert_eq!(q.add_input(input(2, 1)), NULL_FRAME);
        assert_eq!(q.add_input(input(3, 1)), 3);
    }

    #[test]
    fn empty_queue_predicts_zero_at_frame_zero() {
        let mut q = InputQueue::new(0, 1);
        let (predicted, confirmed) = q.input(0);
        assert!(!confirmed);
        assert_eq!(predicted.frame, 0);
        assert_eq!(predicted.bytes(), &[0]);
    }

    #[test]
    fn correct_prediction_leaves_no_incorrect_frame() {
        let mut q = InputQueue::new(0, 1);
        let _ = q.input(0);
        q.add_input(input(0, 0));
        assert_eq!(q.first_incorrect_frame(), NULL_FRAME);
        assert_eq!(q.input(0), (input(0, 0), true));
    }

    #[test]
    fn wrong_prediction_marks_incorrect_frame() {
        let mut q = InputQueue::new(0, 1);
        let _ = q.input(0);
        q.add_input(input(0, 4));
        assert_eq!(q.first_incorrect_frame(), 0);
    }

    #[test]
    fn first_incorrect_frame_is_sticky() {
        let mut q = InputQueue::new(0, 1);
        q.add_input(input(0, 1));
        for f in 1..5 {
            let (predicted, confirmed) = q.input(f);
            assert!(!confirmed);
            assert_eq!(predicted.bytes(), &[1]);
        }
        q.add_input(input(1, 1));
        q.add_input(input(2, 5));
        q.add_input(input(3, 6));
        assert_eq!(q.first_incorrect_frame(), 2);

        q.reset_prediction(2);
        assert_eq!(q.first_incorrect_frame(), NULL_FRAME);
        assert_eq!(q.input(3), (input(3, 6), true));
    }

    #[test]
    fn prediction_repeats_last_confirmed_input() {
        let mut q = InputQueue::new(0, 1);
        q.add_input(input(0, 3));
        q.add_input(input(1, 8));
        let (predicted, confirmed) = q.input(6);
        assert!(!confirmed);
        assert_eq!(predicted.frame, 6);
        assert_eq!(predicted.bytes(), &[8]);
    }

    #[test]
    fn discard_keeps_requested_frame() {
        let mut q = InputQueue::new(0, 1);
        for f in 0..=10 {
            q.add_input(input(f, f as u8));
        }
        assert_eq!(q.input(6), (input(6, 6), true));
        q.discard_confirmed_frames(3);
        assert_eq!(q.input(6), (input(6, 6), true));
        assert_eq!(q.len(), 7);
    }

    #[test]
    fn discard_is_clamped_to_last_requested_frame() {
        let mut q = InputQueue::new(0, 1);
        for f in 0..=10 {
            q.add_input(input(f, f as u8));
        }
        let _ = q.input(6);
        q.discard_confirmed_frames(9);
        assert_eq!(q.len(), 4);
        assert_eq!(q.input(7), (input(7, 7), true));
        assert_eq!(q.input(10), (input(10, 10), true));
    }

    #[test]
    fn discard_everything_keeps_prediction_baseline() {
        let mut q = InputQueue::new(0, 1);
        for f in 0..3 {
            q.add_input(input(f, 2));
        }
        q.discard_confirmed_frames(5);
        assert!(q.is_empty());
        let (predicted, confirmed) = q.input(3);
        assert!(!confirmed);
        assert_eq!(predicted.bytes(), &[2]);
        q.add_input(input(3, 2));
        assert_eq!(q.first_incorrect_frame(), NULL_FRAME);
    }

    #[test]
    fn confirmed_input_lookup() {
        let mut q = InputQueue::new(0, 1);
        for f in 0..4 {
            q.add_input(input(f, 9));
        }
        assert_eq!(q.confirmed_input(2), Some(input(2, 9)));
        assert_eq!(q.confirmed_input(4), None);
    }

    #[test]
    #[should_panic]
    fn non_sequential_input_panics() {
        let mut q = InputQueue::new(0, 1);
        q.add_input(input(0, 0));
        q.add_input(input(2, 0));
    }
}
