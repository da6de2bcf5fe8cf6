//! Mock transports for testing
//!
//! Two mocks live here:
//!
//! - [`MockTransport`] is a scripted queue: tests enqueue raw replies (or
//!   deliberate timeouts) and inspect the requests the driver sent. Used
//!   for exercising the exchange loop itself (sequence matching, retry).
//! - [`MockRegisterFile`] behaves like the device: it keeps a register
//!   file, answers read/write requests with well-formed replies, and can
//!   drop replies to simulate loss. A write hook lets tests model
//!   controller side effects (busy/done bits) without a real FPGA.

use super::ControlTransport;
use crate::error::Result;
use crate::protocol::{self, Deserializer, ResponseCode, Serializer, CONTROL_PACKET_SIZE};
use crate::timeout::Timeout;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One scripted receive outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Deliver these bytes.
    Reply(Vec<u8>),
    /// Simulate a receive timeout.
    Timeout,
}

/// Scripted mock transport for unit testing.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    replies: VecDeque<MockReply>,
    requests: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create an empty mock; receives time out until replies are queued.
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                replies: VecDeque::new(),
                requests: Vec::new(),
            })),
        }
    }

    /// Queue a reply to be delivered by the next receive.
    pub fn queue_reply(&self, reply: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.replies.push_back(MockReply::Reply(reply));
    }

    /// Queue a simulated receive timeout.
    pub fn queue_timeout(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.replies.push_back(MockReply::Timeout);
    }

    /// All requests sent so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().requests.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlTransport for MockTransport {
    fn send(&mut self, request: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.to_vec());
        Ok(())
    }

    fn receive(&mut self, _timeout: &Timeout) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.replies.pop_front() {
            Some(MockReply::Reply(reply)) => Ok(Some(reply)),
            Some(MockReply::Timeout) | None => Ok(None),
        }
    }
}

/// Hook invoked after every register write the mock device accepts.
/// Receives the register file and the written (address, value).
pub type WriteHook = Box<dyn FnMut(&mut HashMap<u32, u32>, u32, u32) + Send>;

/// Register-file responder that answers like the device.
///
/// Replies are generated for each request in order: decode, apply to the
/// register file, encode a success reply with the request's sequence and
/// the latched sequence. `drop_replies(n)` eats the next `n` replies to
/// exercise the retry path.
/// Clones share one register file, so tests keep a handle for preloading
/// and inspection while the session owns a boxed clone.
#[derive(Clone)]
pub struct MockRegisterFile {
    inner: Arc<Mutex<RegisterFileInner>>,
}

struct RegisterFileInner {
    registers: HashMap<u32, u32>,
    requests: Vec<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    drop_remaining: usize,
    latched_sequence: u16,
    write_hook: Option<WriteHook>,
}

impl MockRegisterFile {
    /// Create a responder with an empty register file (all zeros).
    pub fn new() -> Self {
        MockRegisterFile {
            inner: Arc::new(Mutex::new(RegisterFileInner {
                registers: HashMap::new(),
                requests: Vec::new(),
                pending: VecDeque::new(),
                drop_remaining: 0,
                latched_sequence: 0,
                write_hook: None,
            })),
        }
    }

    /// Preload a register value.
    pub fn set_register(&self, address: u32, value: u32) {
        self.inner.lock().unwrap().registers.insert(address, value);
    }

    /// Current value of a register (0 if never written).
    pub fn register(&self, address: u32) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// All raw requests received so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Drop the next `count` replies (the requests still take effect).
    pub fn drop_replies(&self, count: usize) {
        self.inner.lock().unwrap().drop_remaining = count;
    }

    /// Install a side-effect hook run after each accepted write.
    pub fn set_write_hook(&self, hook: WriteHook) {
        self.inner.lock().unwrap().write_hook = Some(hook);
    }
}

impl RegisterFileInner {
    fn register(&self, address: u32) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn handle_request(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let mut deserializer = Deserializer::new(request);
        let opcode = deserializer.next_u8()?;
        let flags = deserializer.next_u8()?;
        let sequence = deserializer.next_u16_be()?;
        let _reserved = deserializer.next_u8()?;
        let _reserved = deserializer.next_u8()?;
        let address = deserializer.next_u32_be()?;

        self.latched_sequence = sequence;

        let mut serializer = Serializer::new(CONTROL_PACKET_SIZE);
        serializer.append_u8(opcode)?;
        serializer.append_u8(flags)?;
        serializer.append_u16_be(sequence)?;
        match opcode {
            protocol::WR_DWORD => {
                let value = deserializer.next_u32_be()?;
                self.registers.insert(address, value);
                if let Some(hook) = self.write_hook.as_mut() {
                    hook(&mut self.registers, address, value);
                }
                serializer.append_u8(ResponseCode::Success.to_wire())?;
            }
            protocol::RD_DWORD => {
                let value = self.register(address);
                serializer.append_u8(ResponseCode::Success.to_wire())?;
                serializer.append_u8(0)?; // reserved
                serializer.append_u32_be(address)?;
                serializer.append_u32_be(value)?;
                serializer.append_u16_be(self.latched_sequence)?;
            }
            _ => {
                serializer.append_u8(ResponseCode::InvalidCmd.to_wire())?;
            }
        }
        Ok(serializer.finish())
    }
}

impl Default for MockRegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlTransport for MockRegisterFile {
    fn send(&mut self, request: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.to_vec());
        let reply = inner.handle_request(request)?;
        if inner.drop_remaining > 0 {
            inner.drop_remaining -= 1;
            return Ok(());
        }
        inner.pending.push_back(reply);
        Ok(())
    }

    fn receive(&mut self, _timeout: &Timeout) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap().pending.pop_front())
    }
}
