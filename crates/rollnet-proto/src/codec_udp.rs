use bytes::BytesMut;

use crate::{
    constants::MAX_UDP_PACKET_SIZE,
    error::ProtoError,
    header::Header,
    messages::{MessageBody, UdpMessage},
    msg_type::MsgType,
};

/// Encode a message into a datagram.
///
/// The header's `msg_type` is taken from the body, so a stale tag can never
/// reach the wire.
pub fn encode_udp(msg: &UdpMessage) -> Result<Vec<u8>, ProtoError> {
    if let MessageBody::Input(input) = &msg.body {
        input.validate()?;
    }

    let len = msg.encoded_len();
    if len > MAX_UDP_PACKET_SIZE {
        return Err(ProtoError::DatagramTooLarge(len));
    }

    let mut header = msg.header;
    header.msg_type = msg.body.msg_type() as u8;
    let mut hbuf = [0u8; Header::LEN];
    header.encode_into(&mut hbuf);

    let mut out = BytesMut::with_capacity(len);
    out.extend_from_slice(&hbuf);
    msg.body.encode(&mut out);
    debug_assert_eq!(out.len(), len);
    Ok(out.to_vec())
}

/// Decode a datagram. Trailing bytes after a fixed-size body are rejected.
pub fn decode_udp(datagram: &[u8]) -> Result<UdpMessage, ProtoError> {
    if datagram.len() > MAX_UDP_PACKET_SIZE {
        return Err(ProtoError::DatagramTooLarge(datagram.len()));
    }

    let (header, mut rest) = Header::decode(datagram)?;
    let msg_type = MsgType::from_repr(header.msg_type)
        .ok_or(ProtoError::UnknownMsgType(header.msg_type))?;
    let body = MessageBody::decode(msg_type, &mut rest)?;
    if !rest.is_empty() {
        return Err(ProtoError::LengthMismatch);
    }
    Ok(UdpMessage { header, body })
}
