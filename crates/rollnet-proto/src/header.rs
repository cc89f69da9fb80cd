use crate::{constants::HEADER_LEN, error::ProtoError};

/// Datagram header (wire format).
///
/// Encoding rules:
/// - Fixed size: exactly `HEADER_LEN` bytes.
/// - Integer fields are little-endian.
/// - Layout is defined by `encode_into()` / `decode()` offsets below.
///
/// The header does not validate `magic` or `sequence`; the peer protocol decides
/// whether a packet is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender's per-session magic number. Zero before the sender has one.
    pub magic: u16,

    /// Sender sequence number, wrapping.
    pub sequence: u16,

    /// Raw message type. Mapped to [`MsgType`](crate::msg_type::MsgType) by the codec.
    pub msg_type: u8,
}

impl Header {
    /// Header size in bytes for the current wire layout.
    pub const LEN: usize = HEADER_LEN;

    pub fn new(msg_type: u8) -> Self {
        Self {
            magic: 0,
            sequence: 0,
            msg_type,
        }
    }

    /// Encode this header into `out` using the fixed wire layout.
    ///
    /// Offsets (bytes):
    /// - 0..2 magic (u16 LE)
    /// - 2..4 sequence (u16 LE)
    /// - 4    msg_type
    pub fn encode_into(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2..4].copy_from_slice(&self.sequence.to_le_bytes());
        out[4] = self.msg_type;
    }

    /// Decode the header at the front of `buf`, returning it and the body slice.
    pub fn decode(buf: &[u8]) -> Result<(Header, &[u8]), ProtoError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtoError::TooShort);
        }

        let magic = read_u16_le(buf, 0)?;
        let sequence = read_u16_le(buf, 2)?;
        let msg_type = buf[4];

        let h = Header {
            magic,
            sequence,
            msg_type,
        };

        Ok((h, &buf[HEADER_LEN..]))
    }
}

fn read_u16_le(buf: &[u8], start: usize) -> Result<u16, ProtoError> {
    let bytes: [u8; 2] = buf
        .get(start..start + 2)
        .ok_or(ProtoError::TooShort)?
        .try_into()
        .map_err(|_| ProtoError::TooShort)?;
    Ok(u16::from_le_bytes(bytes))
}
