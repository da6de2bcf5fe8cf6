//! setu-link - Control-plane driver for network-attached FPGA sensor bridges
//!
//! This library speaks the bridge's UDP register protocol and builds the
//! device-facing layers on top of it:
//!
//! - sequence-numbered read/write exchanges with retry and timeout policy
//! - I2C, SPI, and GPIO controller clients
//! - interprocess named locks serializing the shared controller engines
//! - device session lifecycle: start, stop, reset, PTP synchronization

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod named_lock;
pub mod protocol;
pub mod timeout;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use device::{BoardId, DeviceInfo, DeviceSession, SessionRegistry};
pub use error::{Error, Result};
pub use timeout::Timeout;
