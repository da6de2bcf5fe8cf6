//! UDP control-channel transport

use super::ControlTransport;
use crate::error::Result;
use crate::timeout::Timeout;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Largest datagram the control plane will ever hand us; reply buffers are
/// allocated to this size and trimmed to the received length.
const UDP_PACKET_SIZE: usize = 1536;

/// UDP transport for the control channel.
///
/// Owns the socket for the lifetime of a device session. The socket is
/// bound to an ephemeral local port; the peer address travels with every
/// send so a rebooting device keeps the same transport.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Open a socket for control traffic to `peer_ip:control_port`.
    pub fn open(peer_ip: IpAddr, control_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        let peer = SocketAddr::new(peer_ip, control_port);
        log::debug!("Opened control socket to {}", peer);
        Ok(UdpTransport { socket, peer })
    }

    /// Raw file descriptor of the control socket, for collaborator
    /// primitives (ARP cache priming) that need one.
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.socket.as_raw_fd()
    }
}

impl ControlTransport for UdpTransport {
    fn send(&mut self, request: &[u8]) -> Result<()> {
        log::trace!("send_control request={:02x?} peer={}", request, self.peer);
        self.socket.send_to(request, self.peer)?;
        Ok(())
    }

    fn receive(&mut self, timeout: &Timeout) -> Result<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; UDP_PACKET_SIZE];
        loop {
            let Some(remaining) = timeout.remaining() else {
                return Ok(None);
            };
            // set_read_timeout(0) means block forever; clamp to 1us instead
            let wait = remaining.max(Duration::from_micros(1));
            self.socket.set_read_timeout(Some(wait))?;
            match self.socket.recv_from(&mut buffer) {
                Ok((received, _peer)) => {
                    buffer.truncate(received);
                    return Ok(Some(buffer));
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // bounded wait expired; loop re-checks the deadline
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        Some(self.as_raw_fd())
    }
}
