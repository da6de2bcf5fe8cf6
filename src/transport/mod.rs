//! Control-channel transport abstraction

use crate::error::Result;
use crate::timeout::Timeout;

mod mock;
mod udp;

pub use mock::{MockRegisterFile, MockTransport};
pub use udp::UdpTransport;

/// Transport trait for the request/reply control channel.
///
/// `send` transmits exactly one framed request; `receive` blocks until one
/// reply datagram arrives or the timeout deadline passes, returning `None`
/// on expiry. Reply matching (sequence numbers, retries) lives above this
/// trait — the transport only moves datagrams.
pub trait ControlTransport: Send {
    /// Transmit one request datagram to the configured peer.
    fn send(&mut self, request: &[u8]) -> Result<()>;

    /// Block until a datagram arrives or the deadline passes.
    ///
    /// Returns `Ok(None)` when the timeout elapses without traffic; socket
    /// errors other than the bounded wait expiring are surfaced as errors.
    fn receive(&mut self, timeout: &Timeout) -> Result<Option<Vec<u8>>>;

    /// Underlying socket descriptor, when the transport has one. Used to
    /// prime the host ARP cache after a device reset.
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }
}
