//! Bit-delta coding of pending inputs.
//!
//! For each frame, every bit that differs from the previous frame is written
//! as `1, value, index`; a single `0` closes the frame. The first frame is
//! relative to the last input the receiver acknowledged.

use rollnet_proto::{
    bitvector::{BitError, BitReader, BitWriter},
    constants::MAX_INPUT_BUFFER,
    limits::{INPUT_BIT_INDEX_BITS, MAX_COMPRESSED_BITS},
    messages::InputMsg,
};
use thiserror::Error;

use crate::input::{Frame, GameInput};

/// Bits one changed input bit costs on the wire.
const CHANGE_RECORD_BITS: usize = 2 + INPUT_BIT_INDEX_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("bit stream error: {0}")]
    BitStream(#[from] BitError),
    #[error("input size out of range: {0}")]
    InputSize(usize),
    #[error("bit index {index} out of range for {size}-byte input")]
    BitIndex { index: usize, size: usize },
    #[error("start frame {0} out of range")]
    StartFrame(u32),
    #[error("frame {frame} skips ahead of expected frame {expected}")]
    FrameGap { frame: Frame, expected: Frame },
}

/// Output of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bits: Vec<u8>,
    pub num_bits: usize,
    /// How many of the pending inputs fit.
    pub frames: usize,
}

/// Encodes `pending` relative to `reference`.
///
/// Stops before the first frame that would overflow the bit budget; the
/// remaining frames go out once earlier ones are acknowledged.
pub fn encode<'a>(
    reference: &GameInput,
    pending: impl IntoIterator<Item = &'a GameInput>,
) -> Result<Encoded, BitError> {
    let mut writer = BitWriter::with_capacity(MAX_COMPRESSED_BITS);
    let mut last: Option<GameInput> = None;
    let mut frames = 0;

    for current in pending {
        let prev = match last {
            Some(prev) => prev,
            None if reference.size() == current.size() => *reference,
            None => GameInput::blank(reference.frame, current.size()),
        };

        let changed: Vec<usize> = (0..current.bit_len())
            .filter(|&i| current.value(i) != prev.value(i))
            .collect();
        let cost = changed.len() * CHANGE_RECORD_BITS + 1;
        if cost > writer.remaining() {
            break;
        }

        for i in changed {
            writer.write_bit(true)?;
            writer.write_bit(current.value(i))?;
            writer.write_bits(i as u32, INPUT_BIT_INDEX_BITS)?;
        }
        writer.write_bit(false)?;

        last = Some(*current);
        frames += 1;
    }

    let (bits, num_bits) = writer.finish();
    Ok(Encoded {
        bits,
        num_bits,
        frames,
    })
}

/// Applies the frames in `msg` onto `last_received`, calling `on_frame` for
/// every frame that follows it directly.
///
/// Frames already received are parsed and skipped. A frame is only applied
/// once its terminator has been read, so an error never leaves a partially
/// applied frame behind; frames before the error stay applied.
pub fn decode(
    msg: &InputMsg,
    last_received: &mut GameInput,
    mut on_frame: impl FnMut(&GameInput),
) -> Result<(), DeltaError> {
    if msg.num_bits == 0 {
        return Ok(());
    }

    let Ok(start_frame) = Frame::try_from(msg.start_frame) else {
        return Err(DeltaError::StartFrame(msg.start_frame));
    };
    let input_size = msg.input_size as usize;
    if input_size == 0 || input_size > MAX_INPUT_BUFFER {
        return Err(DeltaError::InputSize(input_size));
    }
    if last_received.size() != input_size {
        *last_received = GameInput::blank(last_received.frame, input_size);
    }
    if last_received.frame < 0 {
        last_received.frame = start_frame - 1;
    }

    let mut reader = BitReader::new(&msg.bits, msg.num_bits as usize);
    let mut current_frame = start_frame;

    while !reader.is_empty() {
        let expected = last_received.frame + 1;
        if current_frame > expected {
            return Err(DeltaError::FrameGap {
                frame: current_frame,
                expected,
            });
        }
        let use_inputs = current_frame == expected;

        let mut next = *last_received;
        while reader.read_bit()? {
            let on = reader.read_bit()?;
            let index = reader.read_bits(INPUT_BIT_INDEX_BITS)? as usize;
            if index >= next.bit_len() {
                return Err(DeltaError::BitIndex {
                    index,
                    size: input_size,
                });
            }
            if use_inputs {
                next.set_bit(index, on);
            }
        }

        if use_inputs {
            next.frame = current_frame;
            *last_received = next;
            on_frame(last_received);
        }
        current_frame += 1;
    }

    Ok(())
}
