//! Datagram transports.
//!
//! Sessions only need to send a message to an address and drain whatever
//! has arrived, so the transport is a small non-blocking trait. [`udp`]
//! wraps a real socket; [`memory`] is an in-process network for tests and
//! local play.

pub mod memory;
pub mod udp;

use std::{fmt::Debug, hash::Hash};

use rollnet_proto::UdpMessage;

pub use memory::{MemoryAddr, MemoryNetwork, MemorySocket};
pub use udp::UdpNonBlockingSocket;

/// A non-blocking datagram socket.
pub trait NonBlockingSocket {
    type Address: Clone + PartialEq + Eq + Hash + Debug;

    /// Sends one message. Failures are logged and the datagram is lost,
    /// as it would be on the wire.
    fn send_to(&mut self, msg: &UdpMessage, addr: &Self::Address);

    /// Returns every message received since the last call.
    fn receive_all_messages(&mut self) -> Vec<(Self::Address, UdpMessage)>;
}
