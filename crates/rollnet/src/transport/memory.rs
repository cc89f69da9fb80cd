//! In-process datagram network.
//!
//! Messages are encoded and decoded on the way through, so the wire codec is
//! exercised exactly as with a real socket. Links can be cut per direction to
//! simulate packet loss and dead peers.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use rollnet_proto::{UdpMessage, decode_udp, encode_udp};
use tracing::{trace, warn};

use super::NonBlockingSocket;

/// Address of a [`MemorySocket`] on its [`MemoryNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryAddr(pub u16);

impl fmt::Display for MemoryAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem:{}", self.0)
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    inboxes: HashMap<MemoryAddr, VecDeque<(MemoryAddr, Vec<u8>)>>,
    cut: HashSet<(MemoryAddr, MemoryAddr)>,
    delivered: usize,
    dropped: usize,
}

/// Shared in-memory network. Clones refer to the same network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a socket bound to `addr`, replacing any previous binding.
    pub fn bind(&self, addr: MemoryAddr) -> MemorySocket {
        self.state.lock().inboxes.insert(addr, VecDeque::new());
        MemorySocket {
            addr,
            network: self.clone(),
        }
    }

    /// Enables or disables delivery from `from` to `to`.
    pub fn set_link(&self, from: MemoryAddr, to: MemoryAddr, up: bool) {
        let mut state = self.state.lock();
        if up {
            state.cut.remove(&(from, to));
        } else {
            state.cut.insert((from, to));
        }
    }

    /// Cuts or restores both directions between `a` and `b`.
    pub fn set_connected(&self, a: MemoryAddr, b: MemoryAddr, up: bool) {
        self.set_link(a, b, up);
        self.set_link(b, a, up);
    }

    /// Cuts or restores every link to and from `addr`.
    pub fn isolate(&self, addr: MemoryAddr, isolated: bool) {
        let peers: Vec<MemoryAddr> = self.state.lock().inboxes.keys().copied().collect();
        for peer in peers.into_iter().filter(|p| *p != addr) {
            self.set_connected(addr, peer, !isolated);
        }
    }

    pub fn delivered(&self) -> usize {
        self.state.lock().delivered
    }

    pub fn dropped(&self) -> usize {
        self.state.lock().dropped
    }

    fn deliver(&self, from: MemoryAddr, to: MemoryAddr, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        if state.cut.contains(&(from, to)) {
            state.dropped += 1;
            return;
        }
        let NetworkState {
            inboxes,
            delivered,
            dropped,
            ..
        } = &mut *state;
        match inboxes.get_mut(&to) {
            Some(inbox) => {
                inbox.push_back((from, bytes));
                *delivered += 1;
            }
            None => *dropped += 1,
        }
    }

    fn drain(&self, addr: MemoryAddr) -> Vec<(MemoryAddr, Vec<u8>)> {
        self.state
            .lock()
            .inboxes
            .get_mut(&addr)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

/// Socket on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemorySocket {
    addr: MemoryAddr,
    network: MemoryNetwork,
}

impl MemorySocket {
    pub fn local_addr(&self) -> MemoryAddr {
        self.addr
    }
}

impl NonBlockingSocket for MemorySocket {
    type Address = MemoryAddr;

    fn send_to(&mut self, msg: &UdpMessage, addr: &MemoryAddr) {
        match encode_udp(msg) {
            Ok(bytes) => self.network.deliver(self.addr, *addr, bytes),
            Err(err) => warn!(from = %self.addr, to = %addr, %err, "failed to encode datagram"),
        }
    }

    fn receive_all_messages(&mut self) -> Vec<(MemoryAddr, UdpMessage)> {
        self.network
            .drain(self.addr)
            .into_iter()
            .filter_map(|(from, bytes)| match decode_udp(&bytes) {
                Ok(msg) => Some((from, msg)),
                Err(err) => {
                    trace!(%from, %err, "dropping malformed datagram");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rollnet_proto::MessageBody;

    use super::*;

    fn keep_alive(seq: u16) -> UdpMessage {
        let mut msg = UdpMessage::new(MessageBody::KeepAlive);
        msg.header.sequence = seq;
        msg
    }

    #[test]
    fn delivers_in_order() {
        let net = MemoryNetwork::new();
        let mut a = net.bind(MemoryAddr(1));
        let mut b = net.bind(MemoryAddr(2));

        a.send_to(&keep_alive(1), &MemoryAddr(2));
        a.send_to(&keep_alive(2), &MemoryAddr(2));

        let got = b.receive_all_messages();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, MemoryAddr(1));
        assert_eq!(got[0].1.header.sequence, 1);
        assert_eq!(got[1].1.header.sequence, 2);
        assert!(b.receive_all_messages().is_empty());
        assert_eq!(net.delivered(), 2);
    }

    #[test]
    fn cut_link_drops_one_direction() {
        let net = MemoryNetwork::new();
        let mut a = net.bind(MemoryAddr(1));
        let mut b = net.bind(MemoryAddr(2));
        net.set_link(MemoryAddr(1), MemoryAddr(2), false);

        a.send_to(&keep_alive(1), &MemoryAddr(2));
        b.send_to(&keep_alive(1), &MemoryAddr(1));

        assert!(b.receive_all_messages().is_empty());
        assert_eq!(a.receive_all_messages().len(), 1);
        assert_eq!(net.dropped(), 1);

        net.set_link(MemoryAddr(1), MemoryAddr(2), true);
        a.send_to(&keep_alive(2), &MemoryAddr(2));
        assert_eq!(b.receive_all_messages().len(), 1);
    }

    #[test]
    fn unbound_destination_is_dropped() {
        let net = MemoryNetwork::new();
        let mut a = net.bind(MemoryAddr(1));
        a.send_to(&keep_alive(1), &MemoryAddr(9));
        assert_eq!(net.dropped(), 1);
    }

    #[test]
    fn isolate_cuts_every_peer() {
        let net = MemoryNetwork::new();
        let mut a = net.bind(MemoryAddr(1));
        let mut b = net.bind(MemoryAddr(2));
        let mut c = net.bind(MemoryAddr(3));
        net.isolate(MemoryAddr(3), true);

        c.send_to(&keep_alive(1), &MemoryAddr(1));
        a.send_to(&keep_alive(1), &MemoryAddr(3));
        a.send_to(&keep_alive(1), &MemoryAddr(2));

        assert!(a.receive_all_messages().is_empty());
        assert!(c.receive_all_messages().is_empty());
        assert_eq!(b.receive_all_messages().len(), 1);
    }
}
