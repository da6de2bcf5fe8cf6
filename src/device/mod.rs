//! Device session, lifecycle, and collaborator seams

use crate::error::{Error, Result};
use crate::timeout::Timeout;
use std::net::IpAddr;

mod registry;
mod session;

pub use registry::SessionRegistry;
pub use session::DeviceSession;

// Lifecycle registers
/// FPGA version register
pub const FPGA_VERSION: u32 = 0x80;
/// FPGA build date register
pub const FPGA_DATE: u32 = 0x84;
/// First PTP synchronized-timestamp register; reads 0 until the device has
/// locked to a PTP master.
pub const FPGA_PTP_SYNC_TS_0: u32 = 0x180;

// Bus controller register banks
/// SPI controller routed to the board front-end
pub const BOARD_SPI_CTRL: u32 = 0x0300_0000;
/// SPI controller routed to the camera connector
pub const CAM_SPI_CTRL: u32 = 0x0300_0200;
/// I2C controller routed to the board peripherals
pub const BOARD_I2C_CTRL: u32 = 0x0400_0000;
/// I2C controller routed to the camera connector
pub const CAM_I2C_CTRL: u32 = 0x0400_0200;

/// Board variants, as reported in enumeration metadata.
///
/// Closed enumeration: unknown wire ids are rejected at decode time so a
/// new board revision fails loudly instead of being mishandled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardId {
    /// Lite bridge board (16 GPIO pins)
    Lite,
    /// 100G bridge board (no GPIO block)
    Hub100G,
    /// Polarfire-based board (no GPIO block)
    Polarfire,
    /// Nano bridge board (54 GPIO pins)
    Nano,
}

impl BoardId {
    /// Decode the numeric board id from enumeration metadata.
    pub fn from_wire(board_id: u32) -> Result<Self> {
        match board_id {
            2 => Ok(BoardId::Lite),
            3 => Ok(BoardId::Hub100G),
            4 => Ok(BoardId::Polarfire),
            5 => Ok(BoardId::Nano),
            other => Err(Error::InvalidParameter(format!(
                "unknown board id {other}"
            ))),
        }
    }

    /// GPIO pins available on this board; boards without a GPIO block are
    /// rejected here rather than at first pin access.
    pub fn gpio_pin_count(self) -> Result<u32> {
        match self {
            BoardId::Nano => Ok(54),
            BoardId::Lite => Ok(16),
            BoardId::Hub100G | BoardId::Polarfire => Err(Error::NotSupported(
                "GPIO is not available on this board".to_string(),
            )),
        }
    }
}

/// Result of device enumeration, resolved from the external enumerator's
/// metadata into plain fields.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device control-plane IP address
    pub peer_ip: IpAddr,
    /// UDP port for control transactions
    pub control_port: u16,
    /// Device serial number; keys the session registry and lock files
    pub serial_number: String,
    /// Ask the device to verify sequence numbers on every transaction
    pub sequence_number_checking: bool,
    /// Board variant, when enumeration reported one
    pub board_id: Option<BoardId>,
}

/// Network attachment details learned when a device (re-)enumerates.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Host interface the device was found on
    pub interface: String,
    /// IP address the device answers on
    pub client_ip_address: IpAddr,
    /// MAC address of the device, colon-separated hex
    pub mac_id: String,
}

/// Device discovery collaborator.
///
/// Discovery itself is outside this crate; `reset()` needs these two
/// primitives to wait for the rebooted device and to prime the host ARP
/// cache with the MAC/IP pair it just learned (avoiding kernel ARP stalls
/// on the first post-reset exchange).
pub trait Enumerator: Send + Sync {
    /// Block until the device at `peer_ip` re-enumerates or the timeout
    /// expires.
    fn find_channel(&self, peer_ip: IpAddr, timeout: Timeout) -> Result<ChannelInfo>;

    /// Install `ip` → `mac` into the host ARP cache via `socket_fd`.
    fn arp_set(
        &self,
        socket_fd: std::os::unix::io::RawFd,
        interface: &str,
        ip: IpAddr,
        mac: &str,
    ) -> Result<()>;
}

/// Capability registered by upper-layer bus clients that need to
/// re-program their peripheral after a device reset.
pub trait ResetObserver: Send + Sync {
    /// Re-establish this client's device-side state.
    fn reset(&self) -> Result<()>;
}
