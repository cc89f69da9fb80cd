//! Wire format for the rollnet peer-to-peer protocol.
//!
//! Every datagram is `[Header][Body]`, little-endian and fixed-layout. The
//! input body carries a bit-packed delta stream built with [`bitvector`].

pub mod bitvector;
pub mod codec_udp;
pub mod constants;
pub mod error;
pub mod header;
pub mod limits;
pub mod messages;
pub mod msg_type;

pub use codec_udp::{decode_udp, encode_udp};
pub use error::ProtoError;
pub use header::Header;
pub use messages::{ConnectStatus, MessageBody, UdpMessage};
pub use msg_type::MsgType;
