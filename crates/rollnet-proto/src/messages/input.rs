use bytes::{Buf, BufMut};

use crate::{
    constants::{MAX_INPUT_BUFFER, MAX_PLAYERS},
    error::ProtoError,
    limits::{INPUT_BODY_FIXED_LEN, MAX_COMPRESSED_BITS, bytes_for_bits},
    messages::{ConnectStatus, ensure_remaining},
};

/// Input message body.
///
/// `bits` holds the delta stream for frames `start_frame..`, relative to the
/// last input the receiver acknowledged. Only the first `num_bits` bits are
/// meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMsg {
    pub start_frame: u32,
    /// Last frame the sender has received from the receiver; `-1` for none.
    pub ack_frame: i32,
    pub input_size: u8,
    pub num_bits: u16,
    pub disconnect_requested: bool,
    pub peer_connect_status: [ConnectStatus; MAX_PLAYERS],
    pub bits: Vec<u8>,
}

impl Default for InputMsg {
    fn default() -> Self {
        Self {
            start_frame: 0,
            ack_frame: -1,
            input_size: 0,
            num_bits: 0,
            disconnect_requested: false,
            peer_connect_status: [ConnectStatus::default(); MAX_PLAYERS],
            bits: Vec::new(),
        }
    }
}

impl InputMsg {
    pub fn encoded_len(&self) -> usize {
        INPUT_BODY_FIXED_LEN + bytes_for_bits(self.num_bits as usize)
    }

    pub(crate) fn validate(&self) -> Result<(), ProtoError> {
        let num_bits = self.num_bits as usize;
        if num_bits > MAX_COMPRESSED_BITS {
            return Err(ProtoError::TooManyBits(num_bits));
        }
        if self.input_size as usize > MAX_INPUT_BUFFER {
            return Err(ProtoError::InputSize(self.input_size as usize));
        }
        if self.bits.len() != bytes_for_bits(num_bits) {
            return Err(ProtoError::LengthMismatch);
        }
        Ok(())
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.start_frame);
        out.put_i32_le(self.ack_frame);
        out.put_u8(self.input_size);
        out.put_u16_le(self.num_bits);
        out.put_u8(u8::from(self.disconnect_requested));
        for status in &self.peer_connect_status {
            status.encode(out);
        }
        out.put_slice(&self.bits);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        ensure_remaining(buf, INPUT_BODY_FIXED_LEN)?;
        let start_frame = buf.get_u32_le();
        let ack_frame = buf.get_i32_le();
        let input_size = buf.get_u8();
        let num_bits = buf.get_u16_le();
        let disconnect_requested = buf.get_u8() != 0;
        let mut peer_connect_status = [ConnectStatus::default(); MAX_PLAYERS];
        for status in &mut peer_connect_status {
            *status = ConnectStatus::decode(buf)?;
        }

        let bit_bytes = bytes_for_bits(num_bits as usize);
        if buf.remaining() != bit_bytes {
            return Err(ProtoError::LengthMismatch);
        }
        let mut bits = vec![0u8; bit_bytes];
        buf.copy_to_slice(&mut bits);

        let msg = Self {
            start_frame,
            ack_frame,
            input_size,
            num_bits,
            disconnect_requested,
            peer_connect_status,
            bits,
        };
        msg.validate()?;
        Ok(msg)
    }
}
