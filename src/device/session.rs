//! Device session: the request/reply engine behind every register access
//!
//! One `DeviceSession` owns the control socket and the sequence counter for
//! one physical device. All register traffic funnels through `execute`,
//! which sends a single request datagram and then drains replies until one
//! carries the expected sequence number or the deadline passes. Retries are
//! driven above that, by the timeout policy's cadence.

use crate::bus::{Gpio, I2c, Spi, SpiConfig};
use crate::config::TimeoutConfig;
use crate::device::{
    BoardId, DeviceInfo, Enumerator, ResetObserver, FPGA_DATE, FPGA_PTP_SYNC_TS_0, FPGA_VERSION,
};
use crate::error::{Error, Result};
use crate::named_lock::NamedLock;
use crate::protocol::{self, Deserializer, ReadReply, ReplyHeader, ResponseCode};
use crate::timeout::Timeout;
use crate::transport::{ControlTransport, UdpTransport};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Power/reset control registers
const CLOCK_CTRL: u32 = 0x8;
const RESET_CTRL: u32 = 0x4;

/// How long the board's power rails take to settle around a reset strobe.
const RESET_SETTLE: Duration = Duration::from_millis(100);

/// Poll cadence while waiting for the FPGA to report a PTP timestamp.
const PTP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport and sequence counter, guarded together: a request and its
/// sequence number must be claimed atomically or two threads could wait on
/// each other's replies.
struct ExchangeState {
    transport: Option<Box<dyn ControlTransport>>,
    sequence: u16,
}

impl ExchangeState {
    fn next_sequence(&mut self) -> u16 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }
}

/// Control-plane session for one device.
///
/// Cloning is deliberately not offered; share a session with `Arc` and let
/// [`super::SessionRegistry`] hand out one instance per serial number.
pub struct DeviceSession {
    peer_ip: IpAddr,
    control_port: u16,
    serial_number: String,
    sequence_number_checking: bool,
    board_id: Option<BoardId>,
    timeouts: TimeoutConfig,
    enumerator: Option<Arc<dyn Enumerator>>,
    exchange: Mutex<ExchangeState>,
    reset_observers: Mutex<Vec<Arc<dyn ResetObserver>>>,
    // Advisory tallies; useful when diagnosing a lossy link
    read_retries: AtomicU64,
    write_retries: AtomicU64,
    lock_dir: PathBuf,
    i2c_lock: Mutex<Option<Arc<NamedLock>>>,
    spi_lock: Mutex<Option<Arc<NamedLock>>>,
    device_lock: Mutex<Option<Arc<NamedLock>>>,
}

impl DeviceSession {
    /// Create a session for an enumerated device. The control socket is not
    /// opened until [`start`](Self::start).
    pub fn new(device_info: DeviceInfo) -> Self {
        DeviceSession {
            peer_ip: device_info.peer_ip,
            control_port: device_info.control_port,
            serial_number: device_info.serial_number,
            sequence_number_checking: device_info.sequence_number_checking,
            board_id: device_info.board_id,
            timeouts: TimeoutConfig::default(),
            enumerator: None,
            exchange: Mutex::new(ExchangeState {
                transport: None,
                sequence: 0,
            }),
            reset_observers: Mutex::new(Vec::new()),
            read_retries: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
            lock_dir: std::env::temp_dir().join("setu-link"),
            i2c_lock: Mutex::new(None),
            spi_lock: Mutex::new(None),
            device_lock: Mutex::new(None),
        }
    }

    /// Create a session that can re-enumerate its device after a reset.
    pub fn with_enumerator(device_info: DeviceInfo, enumerator: Arc<dyn Enumerator>) -> Self {
        let mut session = Self::new(device_info);
        session.enumerator = Some(enumerator);
        session
    }

    /// Override the directory interprocess lock files live under.
    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = lock_dir.into();
        self
    }

    /// Override the default timeout policies, usually from the `[timeouts]`
    /// table of an [`crate::AppConfig`]. Explicit per-call timeouts still
    /// take precedence.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    /// Open the control socket and confirm the device answers.
    ///
    /// The first exchange after power-up can take a while (the FPGA may
    /// still be loading), so the version probe runs under the long
    /// enumeration timeout and with sequence checking off: the device's
    /// latch and our counter have not been reconciled yet.
    pub fn start(&self) -> Result<()> {
        let transport = UdpTransport::open(self.peer_ip, self.control_port)?;
        self.start_with_transport(Box::new(transport))
    }

    /// Start the session over a caller-supplied transport.
    pub fn start_with_transport(&self, transport: Box<dyn ControlTransport>) -> Result<()> {
        {
            let mut exchange = self.exchange.lock();
            exchange.transport = Some(transport);
            exchange.sequence = 0;
        }
        let version =
            self.read_uint32_with(FPGA_VERSION, Some(Timeout::enumeration()), Some(false))?;
        let date = self.read_uint32_with(FPGA_DATE, None, Some(false))?;
        log::info!(
            "Device {}: fpga_version={:#x} fpga_date={:#x}",
            self.serial_number,
            version,
            date
        );
        Ok(())
    }

    /// Close the control socket. Safe to call on a stopped session.
    pub fn stop(&self) {
        let mut exchange = self.exchange.lock();
        if exchange.transport.take().is_some() {
            log::debug!("Device {}: control session stopped", self.serial_number);
        }
    }

    /// FPGA version register.
    pub fn fpga_version(&self) -> Result<u32> {
        self.read_uint32(FPGA_VERSION)
    }

    /// FPGA build date register.
    pub fn fpga_date(&self) -> Result<u32> {
        self.read_uint32(FPGA_DATE)
    }

    /// Register a callback to run after [`reset`](Self::reset) brings the
    /// device back. Observers run in registration order.
    pub fn on_reset(&self, observer: Arc<dyn ResetObserver>) {
        self.reset_observers.lock().push(observer);
    }

    /// Read one 32-bit register with default policy.
    pub fn read_uint32(&self, address: u32) -> Result<u32> {
        self.read_uint32_with(address, None, None)
    }

    /// Read one 32-bit register.
    ///
    /// `timeout` bounds the whole operation including retries; `None` uses
    /// the register-access default. `sequence_check` overrides the
    /// session-wide setting for this one transaction.
    pub fn read_uint32_with(
        &self,
        address: u32,
        timeout: Option<Timeout>,
        sequence_check: Option<bool>,
    ) -> Result<u32> {
        check_alignment("read_uint32", address)?;
        let sequence_check = sequence_check.unwrap_or(self.sequence_number_checking);
        let mut timeout = timeout.unwrap_or_else(|| self.timeouts.register_access());
        let mut retries = 0u64;
        let result = loop {
            match self.read_attempt(address, &timeout, sequence_check) {
                Ok(Some(value)) => break Ok(value),
                Ok(None) => {
                    if !timeout.retry() {
                        break Err(Error::Timeout {
                            operation: "read_uint32",
                            address,
                        });
                    }
                    retries += 1;
                }
                Err(e) => break Err(e),
            }
        };
        if retries > 0 {
            self.read_retries.fetch_add(retries, Ordering::Relaxed);
            log::debug!(
                "read_uint32 address={:#x} took {} retries",
                address,
                retries
            );
        }
        result
    }

    /// Write one 32-bit register with default policy.
    pub fn write_uint32(&self, address: u32, value: u32) -> Result<()> {
        self.write_uint32_with(address, value, None, true, None)
            .map(|_| ())
    }

    /// Write one 32-bit register.
    ///
    /// With `retry` set, an unacknowledged write is resent on the timeout's
    /// cadence and a final miss is an error. With `retry` clear the write
    /// is fire-and-forget: a missing acknowledgement returns `Ok(false)`
    /// instead of failing, which reset sequences rely on when the device
    /// reboots before it can answer. A reply that does arrive with a
    /// non-success code raises either way.
    pub fn write_uint32_with(
        &self,
        address: u32,
        value: u32,
        timeout: Option<Timeout>,
        retry: bool,
        sequence_check: Option<bool>,
    ) -> Result<bool> {
        check_alignment("write_uint32", address)?;
        let sequence_check = sequence_check.unwrap_or(self.sequence_number_checking);
        let mut timeout = timeout.unwrap_or_else(|| self.timeouts.register_access());
        let mut retries = 0u64;
        let result = loop {
            match self.write_attempt(address, value, &timeout, sequence_check) {
                Ok(true) => break Ok(true),
                Ok(false) => {
                    if !retry {
                        break Ok(false);
                    }
                    if !timeout.retry() {
                        break Err(Error::Timeout {
                            operation: "write_uint32",
                            address,
                        });
                    }
                    retries += 1;
                }
                Err(e) => break Err(e),
            }
        };
        if retries > 0 {
            self.write_retries.fetch_add(retries, Ordering::Relaxed);
            log::debug!(
                "write_uint32 address={:#x} took {} retries",
                address,
                retries
            );
        }
        result
    }

    /// Clear `mask`'s zero bits in a register, atomically with respect to
    /// other processes holding this device's lock.
    pub fn and_uint32(&self, address: u32, mask: u32) -> Result<u32> {
        let lock = self.device_lock()?;
        let _guard = lock.lock()?;
        let value = self.read_uint32(address)? & mask;
        self.write_uint32(address, value)?;
        Ok(value)
    }

    /// Set `mask`'s bits in a register, atomically with respect to other
    /// processes holding this device's lock.
    pub fn or_uint32(&self, address: u32, mask: u32) -> Result<u32> {
        let lock = self.device_lock()?;
        let _guard = lock.lock()?;
        let value = self.read_uint32(address)? | mask;
        self.write_uint32(address, value)?;
        Ok(value)
    }

    /// Retries incurred by reads since the session was created.
    pub fn read_retry_tally(&self) -> u64 {
        self.read_retries.load(Ordering::Relaxed)
    }

    /// Retries incurred by writes since the session was created.
    pub fn write_retry_tally(&self) -> u64 {
        self.write_retries.load(Ordering::Relaxed)
    }

    /// Default timeout policy for I2C transactions on this device.
    pub(crate) fn i2c_timeout(&self) -> Timeout {
        self.timeouts.i2c()
    }

    /// Default timeout policy for SPI transactions on this device.
    pub(crate) fn spi_timeout(&self) -> Timeout {
        self.timeouts.spi()
    }

    /// I2C controller at `bus_address` (e.g. [`super::BOARD_I2C_CTRL`]).
    pub fn i2c(self: &Arc<Self>, bus_address: u32) -> I2c {
        I2c::new(Arc::clone(self), bus_address)
    }

    /// SPI controller at `bus_address` (e.g. [`super::BOARD_SPI_CTRL`]).
    pub fn spi(self: &Arc<Self>, bus_address: u32, config: SpiConfig) -> Result<Spi> {
        Spi::new(Arc::clone(self), bus_address, config)
    }

    /// GPIO block, sized for the enumerated board.
    pub fn gpio(self: &Arc<Self>) -> Result<Gpio> {
        let board_id = self.board_id.ok_or_else(|| {
            Error::InvalidParameter("board id unknown; GPIO pin count unavailable".to_string())
        })?;
        Gpio::new(Arc::clone(self), board_id)
    }

    /// Power-cycle the device and bring the session back up.
    ///
    /// The strobe itself goes through the board power controller on the
    /// front-end SPI bus. The final register write is fire-and-forget: the
    /// device drops off the network mid-write, so an unacknowledged send is
    /// the expected outcome. After the device re-enumerates the ARP cache
    /// is primed with its new attachment, the sequence counter realigns to
    /// the device's cleared latch, and reset observers replay any
    /// peripheral state.
    pub fn reset(self: &Arc<Self>) -> Result<()> {
        log::info!("Device {}: resetting", self.serial_number);
        let spi = self.spi(
            super::BOARD_SPI_CTRL,
            SpiConfig {
                chip_select: 0,
                clock_divisor: 15,
                cpol: false,
                cpha: true,
                width: 1,
            },
        )?;
        spi.transaction(&[0x01, 0x07], &[0x0C], 0, None)?;
        self.write_uint32(CLOCK_CTRL, 0)?;
        std::thread::sleep(RESET_SETTLE);
        spi.transaction(&[0x01, 0x07], &[0x0F], 0, None)?;
        std::thread::sleep(RESET_SETTLE);
        self.write_uint32(CLOCK_CTRL, 0x3)?;

        match self.write_uint32_with(RESET_CTRL, 0x8, None, false, None) {
            Ok(_) => {}
            Err(e) => log::info!("Ignoring error {} while writing the reset strobe", e),
        }

        let enumerator = self.enumerator.as_ref().ok_or_else(|| {
            Error::Enumeration("no enumerator configured; cannot re-find the device".to_string())
        })?;
        let channel = enumerator.find_channel(self.peer_ip, Timeout::enumeration())?;
        log::debug!(
            "Device {} back on interface={} ip={} mac={}",
            self.serial_number,
            channel.interface,
            channel.client_ip_address,
            channel.mac_id
        );

        let socket_fd = self.exchange.lock().transport.as_ref().and_then(|t| t.raw_fd());
        match socket_fd {
            Some(fd) => enumerator.arp_set(
                fd,
                &channel.interface,
                channel.client_ip_address,
                &channel.mac_id,
            )?,
            None => log::debug!("Transport has no socket; skipping ARP priming"),
        }

        // The device's latch cleared to 0; our first checked request must
        // carry 1.
        self.exchange.lock().sequence = 1;

        let version =
            self.read_uint32_with(FPGA_VERSION, Some(Timeout::enumeration()), Some(false))?;
        log::info!(
            "Device {}: back after reset, fpga_version={:#x}",
            self.serial_number,
            version
        );

        let observers = self.reset_observers.lock().clone();
        for observer in observers {
            observer.reset()?;
        }
        Ok(())
    }

    /// Wait for the FPGA to acquire a PTP-synchronized timestamp.
    ///
    /// Returns `Ok(false)` if the deadline passes first; losing the race is
    /// a normal outcome on networks without a PTP master.
    pub fn ptp_synchronize(&self, timeout: Timeout) -> Result<bool> {
        loop {
            match self.read_uint32_with(FPGA_PTP_SYNC_TS_0, None, None) {
                Ok(value) if value != 0 => return Ok(true),
                Ok(_) => {}
                // A lost datagram while polling is not a verdict
                Err(Error::Timeout { .. }) => {}
                Err(e) => return Err(e),
            }
            if timeout.expired() {
                return Ok(false);
            }
            std::thread::sleep(PTP_POLL_INTERVAL);
        }
    }

    /// Interprocess lock serializing I2C transactions on this device.
    pub fn i2c_lock(&self) -> Result<Arc<NamedLock>> {
        self.named_lock(&self.i2c_lock, "i2c")
    }

    /// Interprocess lock serializing SPI transactions on this device.
    pub fn spi_lock(&self) -> Result<Arc<NamedLock>> {
        self.named_lock(&self.spi_lock, "spi")
    }

    /// Interprocess lock for whole-device read-modify-write sequences.
    pub fn device_lock(&self) -> Result<Arc<NamedLock>> {
        self.named_lock(&self.device_lock, "device")
    }

    fn named_lock(
        &self,
        slot: &Mutex<Option<Arc<NamedLock>>>,
        name: &str,
    ) -> Result<Arc<NamedLock>> {
        let mut slot = slot.lock();
        if let Some(lock) = slot.as_ref() {
            return Ok(Arc::clone(lock));
        }
        let lock = Arc::new(NamedLock::open(&self.lock_dir, &self.serial_number, name)?);
        *slot = Some(Arc::clone(&lock));
        Ok(lock)
    }

    /// One read transaction. `Ok(None)` means no matching reply arrived
    /// before the deadline.
    fn read_attempt(
        &self,
        address: u32,
        timeout: &Timeout,
        sequence_check: bool,
    ) -> Result<Option<u32>> {
        let mut exchange = self.exchange.lock();
        let sequence = exchange.next_sequence();
        let request = protocol::encode_read_request(sequence, address, sequence_check)?;
        match self.execute(&mut exchange, sequence, &request, timeout)? {
            None => Ok(None),
            Some((header, payload)) => {
                if header.response_code != ResponseCode::Success {
                    return Err(Error::Response {
                        operation: "read_uint32",
                        address,
                        code: header.response_code,
                    });
                }
                let mut deserializer = Deserializer::new(&payload);
                let reply = ReadReply::decode(&mut deserializer, address)?;
                Ok(Some(reply.value))
            }
        }
    }

    /// One write transaction. `Ok(false)` means no matching reply arrived
    /// before the deadline. A reply that did arrive speaks for the device:
    /// a non-success code raises even when the caller would tolerate
    /// silence.
    fn write_attempt(
        &self,
        address: u32,
        value: u32,
        timeout: &Timeout,
        sequence_check: bool,
    ) -> Result<bool> {
        let mut exchange = self.exchange.lock();
        let sequence = exchange.next_sequence();
        let request = protocol::encode_write_request(sequence, address, value, sequence_check)?;
        match self.execute(&mut exchange, sequence, &request, timeout)? {
            None => Ok(false),
            Some((header, _payload)) => {
                if header.response_code != ResponseCode::Success {
                    return Err(Error::Response {
                        operation: "write_uint32",
                        address,
                        code: header.response_code,
                    });
                }
                Ok(true)
            }
        }
    }

    /// Send one request and wait for its reply.
    ///
    /// Replies carrying a stale sequence number are drained and discarded;
    /// they are echoes of requests we already gave up on. Only the deadline
    /// passing yields `Ok(None)`.
    fn execute(
        &self,
        exchange: &mut ExchangeState,
        sequence: u16,
        request: &[u8],
        timeout: &Timeout,
    ) -> Result<Option<(ReplyHeader, Vec<u8>)>> {
        let transport = exchange.transport.as_mut().ok_or(Error::NotStarted)?;
        let request_time = Instant::now();
        transport.send(request)?;
        loop {
            let Some(reply) = transport.receive(timeout)? else {
                log::debug!("No reply for sequence {} within the deadline", sequence);
                return Ok(None);
            };
            let mut deserializer = Deserializer::new(&reply);
            let header = ReplyHeader::decode(&mut deserializer)?;
            log::trace!(
                "exchange sequence={} response_code={:?} rtt={:?}",
                header.sequence,
                header.response_code,
                request_time.elapsed()
            );
            if header.sequence != sequence {
                log::debug!(
                    "Discarding reply for sequence {} while waiting for {}",
                    header.sequence,
                    sequence
                );
                continue;
            }
            let consumed = reply.len() - deserializer.remaining();
            return Ok(Some((header, reply[consumed..].to_vec())));
        }
    }
}

fn check_alignment(operation: &'static str, address: u32) -> Result<()> {
    if address & 3 != 0 {
        return Err(Error::InvalidParameter(format!(
            "{operation}: address {address:#x} is not 32-bit aligned"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Serializer, CONTROL_PACKET_SIZE, RD_DWORD};
    use crate::transport::{MockRegisterFile, MockTransport};
    use crate::device::ChannelInfo;
    use std::sync::atomic::AtomicUsize;

    fn device_info() -> DeviceInfo {
        DeviceInfo {
            peer_ip: "192.168.0.2".parse().unwrap(),
            control_port: 8192,
            serial_number: "0xDEAD01".to_string(),
            sequence_number_checking: true,
            board_id: Some(BoardId::Nano),
        }
    }

    fn started_session() -> (Arc<DeviceSession>, MockRegisterFile) {
        let device = MockRegisterFile::new();
        let session = Arc::new(DeviceSession::new(device_info()));
        session
            .start_with_transport(Box::new(device.clone()))
            .unwrap();
        (session, device)
    }

    fn read_reply(sequence: u16, address: u32, value: u32) -> Vec<u8> {
        let mut serializer = Serializer::new(CONTROL_PACKET_SIZE);
        serializer.append_u8(RD_DWORD).unwrap();
        serializer.append_u8(0).unwrap();
        serializer.append_u16_be(sequence).unwrap();
        serializer.append_u8(ResponseCode::Success.to_wire()).unwrap();
        serializer.append_u8(0).unwrap();
        serializer.append_u32_be(address).unwrap();
        serializer.append_u32_be(value).unwrap();
        serializer.append_u16_be(sequence).unwrap();
        serializer.finish()
    }

    fn write_reply(sequence: u16, code: ResponseCode) -> Vec<u8> {
        let mut serializer = Serializer::new(CONTROL_PACKET_SIZE);
        serializer.append_u8(crate::protocol::WR_DWORD).unwrap();
        serializer.append_u8(0).unwrap();
        serializer.append_u16_be(sequence).unwrap();
        serializer.append_u8(code.to_wire()).unwrap();
        serializer.finish()
    }

    #[test]
    fn test_not_started_fails() {
        let session = DeviceSession::new(device_info());
        assert!(matches!(session.read_uint32(0x80), Err(Error::NotStarted)));
    }

    #[test]
    fn test_misaligned_address_fails_before_io() {
        // Validation runs before the transport is touched, so even a
        // stopped session reports the parameter problem.
        let session = DeviceSession::new(device_info());
        assert!(matches!(
            session.read_uint32(0x3),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            session.write_uint32(0x81, 1),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_write_then_read() {
        let (session, device) = started_session();
        session.write_uint32(0x1000, 0xDEADBEEF).unwrap();
        assert_eq!(device.register(0x1000), 0xDEADBEEF);
        assert_eq!(session.read_uint32(0x1000).unwrap(), 0xDEADBEEF);
        assert_eq!(session.read_retry_tally(), 0);
        assert_eq!(session.write_retry_tally(), 0);
    }

    #[test]
    fn test_sequence_numbers_increment() {
        let transport = MockTransport::new();
        transport.queue_reply(read_reply(0, FPGA_VERSION, 0x2412));
        transport.queue_reply(read_reply(1, FPGA_DATE, 0x20240101));
        let session = DeviceSession::new(device_info());
        session
            .start_with_transport(Box::new(transport.clone()))
            .unwrap();

        transport.queue_reply(read_reply(2, 0x10, 7));
        assert_eq!(session.read_uint32(0x10).unwrap(), 7);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        // sequence field sits at bytes 2..4 of every request
        let sequences: Vec<u16> = requests
            .iter()
            .map(|r| u16::from_be_bytes([r[2], r[3]]))
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_stale_reply_discarded() {
        let transport = MockTransport::new();
        transport.queue_reply(read_reply(0, FPGA_VERSION, 0x2412));
        transport.queue_reply(read_reply(1, FPGA_DATE, 0x20240101));
        let session = DeviceSession::new(device_info());
        session
            .start_with_transport(Box::new(transport.clone()))
            .unwrap();

        // A late echo of an abandoned request arrives first
        transport.queue_reply(read_reply(999, 0x10, 0xBAD));
        transport.queue_reply(read_reply(2, 0x10, 0x600D));
        assert_eq!(session.read_uint32(0x10).unwrap(), 0x600D);
        // Draining the stale reply is not a retry
        assert_eq!(session.read_retry_tally(), 0);
    }

    #[test]
    fn test_dropped_reply_retries_once() {
        let (session, device) = started_session();
        device.set_register(0x20, 0x1234);
        device.drop_replies(1);
        assert_eq!(session.read_uint32(0x20).unwrap(), 0x1234);
        assert_eq!(session.read_retry_tally(), 1);
    }

    #[test]
    fn test_unacknowledged_write_without_retry() {
        let transport = MockTransport::new();
        transport.queue_reply(read_reply(0, FPGA_VERSION, 0x2412));
        transport.queue_reply(read_reply(1, FPGA_DATE, 0x20240101));
        let session = DeviceSession::new(device_info());
        session
            .start_with_transport(Box::new(transport.clone()))
            .unwrap();

        // No reply queued: the write goes out, nothing comes back
        let timeout = Timeout::new(Duration::from_millis(5), Duration::from_millis(1));
        let acked = session
            .write_uint32_with(0x40, 1, Some(timeout), false, None)
            .unwrap();
        assert!(!acked);
    }

    #[test]
    fn test_error_code_raises_even_without_retry() {
        let transport = MockTransport::new();
        transport.queue_reply(read_reply(0, FPGA_VERSION, 0x2412));
        transport.queue_reply(read_reply(1, FPGA_DATE, 0x20240101));
        let session = DeviceSession::new(device_info());
        session
            .start_with_transport(Box::new(transport.clone()))
            .unwrap();

        // The device answered, and the answer is a rejection: that is a
        // verdict, not silence, even for a fire-and-forget write.
        transport.queue_reply(write_reply(2, ResponseCode::InvalidAddr));
        let result = session.write_uint32_with(0x40, 1, None, false, None);
        assert!(matches!(
            result,
            Err(Error::Response {
                code: ResponseCode::InvalidAddr,
                ..
            })
        ));
    }

    #[test]
    fn test_configured_timeouts_bound_register_access() {
        let transport = MockTransport::new();
        transport.queue_reply(read_reply(0, FPGA_VERSION, 0x2412));
        transport.queue_reply(read_reply(1, FPGA_DATE, 0x20240101));
        let timeouts = TimeoutConfig {
            register_ms: 20,
            register_retry_ms: 5,
            ..TimeoutConfig::default()
        };
        let session = DeviceSession::new(device_info()).with_timeouts(timeouts);
        session
            .start_with_transport(Box::new(transport.clone()))
            .unwrap();

        // No reply queued: the configured 20ms deadline applies, not the
        // stock 500ms one.
        let start = Instant::now();
        assert!(matches!(
            session.read_uint32(0x10),
            Err(Error::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (session, _device) = started_session();
        session.stop();
        session.stop();
        assert!(matches!(session.read_uint32(0x80), Err(Error::NotStarted)));
    }

    #[test]
    fn test_and_or_uint32() {
        let lock_dir = tempfile::tempdir().unwrap();
        let device = MockRegisterFile::new();
        let session =
            Arc::new(DeviceSession::new(device_info()).with_lock_dir(lock_dir.path()));
        session
            .start_with_transport(Box::new(device.clone()))
            .unwrap();

        device.set_register(0x50, 0xFF00_FF00);
        assert_eq!(session.and_uint32(0x50, 0x0FF0_0FF0).unwrap(), 0x0F00_0F00);
        assert_eq!(session.or_uint32(0x50, 0x0000_00FF).unwrap(), 0x0F00_0FFF);
        assert_eq!(device.register(0x50), 0x0F00_0FFF);
    }

    #[test]
    fn test_ptp_synchronize() {
        let (session, device) = started_session();
        device.set_register(FPGA_PTP_SYNC_TS_0, 0x5F00_0000);
        let timeout = Timeout::new(Duration::from_secs(1), Duration::from_millis(100));
        assert!(session.ptp_synchronize(timeout).unwrap());

        device.set_register(FPGA_PTP_SYNC_TS_0, 0);
        let timeout = Timeout::new(Duration::from_millis(10), Duration::from_millis(10));
        assert!(!session.ptp_synchronize(timeout).unwrap());
    }

    struct FixedEnumerator;

    impl Enumerator for FixedEnumerator {
        fn find_channel(&self, peer_ip: IpAddr, _timeout: Timeout) -> Result<ChannelInfo> {
            Ok(ChannelInfo {
                interface: "eth0".to_string(),
                client_ip_address: peer_ip,
                mac_id: "CA:FE:00:00:00:01".to_string(),
            })
        }

        fn arp_set(
            &self,
            _socket_fd: std::os::unix::io::RawFd,
            _interface: &str,
            _ip: IpAddr,
            _mac: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl ResetObserver for CountingObserver {
        fn reset(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_reset_realigns_sequence_and_notifies() {
        let lock_dir = tempfile::tempdir().unwrap();
        let device = MockRegisterFile::new();
        let session = Arc::new(
            DeviceSession::with_enumerator(device_info(), Arc::new(FixedEnumerator))
                .with_lock_dir(lock_dir.path()),
        );
        session
            .start_with_transport(Box::new(device.clone()))
            .unwrap();

        let observer = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        session.on_reset(Arc::clone(&observer) as Arc<dyn ResetObserver>);

        session.reset().unwrap();
        assert_eq!(observer.calls.load(Ordering::Relaxed), 1);
        // Power sequencing went through the front-end controllers
        assert_eq!(device.register(CLOCK_CTRL), 0x3);
        assert_eq!(device.register(RESET_CTRL), 0x8);

        // The device's latch cleared to 0, so the version probe right
        // after reset must go out with sequence 1. It is the last read of
        // the version register on the wire (the start probe used 0).
        let requests = device.requests();
        let probe = requests
            .iter()
            .rev()
            .find(|r| {
                r[0] == RD_DWORD && u32::from_be_bytes([r[6], r[7], r[8], r[9]]) == FPGA_VERSION
            })
            .expect("no version probe recorded");
        assert_eq!(u16::from_be_bytes([probe[2], probe[3]]), 1);

        // First post-reset request (after the version probe at 1) is 2
        device.set_register(0x10, 5);
        assert_eq!(session.read_uint32(0x10).unwrap(), 5);
    }
}
