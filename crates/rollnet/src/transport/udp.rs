use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr, UdpSocket},
};

use rollnet_proto::{
    UdpMessage, constants::MAX_UDP_PACKET_SIZE, decode_udp, encode_udp,
};
use tracing::{debug, warn};

use super::NonBlockingSocket;

/// UDP socket in non-blocking mode.
#[derive(Debug)]
pub struct UdpNonBlockingSocket {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl UdpNonBlockingSocket {
    /// Binds to `0.0.0.0:port`.
    pub fn bind_to_port(port: u16) -> io::Result<Self> {
        Self::bind((Ipv4Addr::UNSPECIFIED, port).into())
    }

    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        debug!(addr = %socket.local_addr()?, "udp socket bound");
        Ok(Self {
            socket,
            buffer: vec![0; MAX_UDP_PACKET_SIZE],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl NonBlockingSocket for UdpNonBlockingSocket {
    type Address = SocketAddr;

    fn send_to(&mut self, msg: &UdpMessage, addr: &SocketAddr) {
        let bytes = match encode_udp(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%addr, %err, "failed to encode datagram");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&bytes, addr) {
            debug!(%addr, %err, "send failed");
        }
    }

    fn receive_all_messages(&mut self) -> Vec<(SocketAddr, UdpMessage)> {
        let mut received = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((len, from)) => match decode_udp(&self.buffer[..len]) {
                    Ok(msg) => received.push((from, msg)),
                    Err(err) => debug!(%from, len, %err, "dropping malformed datagram"),
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                // Windows reports ICMP port unreachable from a previous send here.
                Err(err) if err.kind() == ErrorKind::ConnectionReset => continue,
                Err(err) => {
                    warn!(%err, "udp receive failed");
                    break;
                }
            }
        }
        received
    }
}
