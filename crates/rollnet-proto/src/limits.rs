//! Limits of the bit-packed input delta stream.

use crate::constants::{CONNECT_STATUS_LEN, HEADER_LEN, MAX_INPUT_BUFFER, MAX_PLAYERS};

/// Maximum number of bits in one input message's delta stream.
pub const MAX_COMPRESSED_BITS: usize = 4096;

/// Width of the bit index written for each changed bit.
///
/// 9 bits address up to 512 bits, enough for a full `MAX_INPUT_BUFFER` input.
pub const INPUT_BIT_INDEX_BITS: usize = 9;

/// Fixed part of an input body (everything before the delta bytes).
pub const INPUT_BODY_FIXED_LEN: usize = 4 + 4 + 1 + 2 + 1 + CONNECT_STATUS_LEN * MAX_PLAYERS;

/// Largest possible input datagram.
pub const MAX_INPUT_DATAGRAM: usize =
    HEADER_LEN + INPUT_BODY_FIXED_LEN + MAX_COMPRESSED_BITS.div_ceil(8);

/// Number of bytes needed to hold `num_bits` bits.
#[inline]
pub const fn bytes_for_bits(num_bits: usize) -> usize {
    num_bits.div_ceil(8)
}

/// Worst-case bits used by one frame in the delta stream: every bit changes
/// (marker + value + index each), plus the terminator.
#[inline]
pub const fn worst_case_frame_bits(input_size: usize) -> usize {
    input_size * 8 * (2 + INPUT_BIT_INDEX_BITS) + 1
}

const _: () = assert!(MAX_INPUT_BUFFER * 8 <= 1 << INPUT_BIT_INDEX_BITS);
