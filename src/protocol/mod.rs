//! Control-plane packet format
//!
//! Request format (all multi-byte fields big-endian):
//!
//! ```text
//! [OPCODE] [FLAGS] [SEQUENCE u16] [RSVD] [RSVD] [ADDRESS u32] ([VALUE u32])
//! ```
//!
//! Reply header (always present, 5 bytes):
//!
//! ```text
//! [OPCODE echo] [FLAGS echo] [SEQUENCE u16] [RESPONSE_CODE]
//! ```
//!
//! A read reply continues with: reserved u8, echoed address u32, value u32,
//! and the device's latched sequence u16.

use crate::error::{Error, Result};

pub mod metadata;
pub mod wire;

pub use metadata::FrameMetadata;
pub use wire::{Deserializer, Serializer};

/// Write one 32-bit register.
pub const WR_DWORD: u8 = 0x04;
/// Read one 32-bit register.
pub const RD_DWORD: u8 = 0x14;

/// Request flag: an acknowledgement is requested.
pub const REQUEST_FLAGS_ACK_REQUEST: u8 = 0b0000_0001;
/// Request flag: the device should verify the sequence number.
pub const REQUEST_FLAGS_SEQUENCE_CHECK: u8 = 0b0000_0010;

/// Allocation size for control requests and replies; guaranteed to be
/// large enough for the largest control datagram.
pub const CONTROL_PACKET_SIZE: usize = 20;

/// Response codes reported by the device in the reply header.
///
/// Codes are stable across device firmware versions. Unrecognized codes
/// decode to `Unknown` rather than failing, so a newer device does not
/// break an older host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Command accepted
    Success,
    /// Unspecified device-side failure
    ErrorGeneral,
    /// Address not mapped or not writable
    InvalidAddr,
    /// Opcode not recognized
    InvalidCmd,
    /// Datagram length inconsistent with opcode
    InvalidPktLength,
    /// Flag bits not supported
    InvalidFlags,
    /// Device-side command buffer full
    BufferFull,
    /// Block transfer size not supported
    InvalidBlockSize,
    /// Indirect address out of range
    InvalidIndirectAddr,
    /// Device-internal command timed out
    CommandTimeout,
    /// Sequence check requested and mismatched
    SequenceCheckFail,
    /// Fallback for codes this host does not know
    Unknown(u8),
}

impl ResponseCode {
    /// Decode a wire response code.
    pub fn from_wire(code: u8) -> Self {
        match code {
            0x00 => ResponseCode::Success,
            0x02 => ResponseCode::ErrorGeneral,
            0x03 => ResponseCode::InvalidAddr,
            0x04 => ResponseCode::InvalidCmd,
            0x05 => ResponseCode::InvalidPktLength,
            0x06 => ResponseCode::InvalidFlags,
            0x07 => ResponseCode::BufferFull,
            0x08 => ResponseCode::InvalidBlockSize,
            0x09 => ResponseCode::InvalidIndirectAddr,
            0x0A => ResponseCode::CommandTimeout,
            0x0B => ResponseCode::SequenceCheckFail,
            other => ResponseCode::Unknown(other),
        }
    }

    /// Wire value of this code.
    pub fn to_wire(self) -> u8 {
        match self {
            ResponseCode::Success => 0x00,
            ResponseCode::ErrorGeneral => 0x02,
            ResponseCode::InvalidAddr => 0x03,
            ResponseCode::InvalidCmd => 0x04,
            ResponseCode::InvalidPktLength => 0x05,
            ResponseCode::InvalidFlags => 0x06,
            ResponseCode::BufferFull => 0x07,
            ResponseCode::InvalidBlockSize => 0x08,
            ResponseCode::InvalidIndirectAddr => 0x09,
            ResponseCode::CommandTimeout => 0x0A,
            ResponseCode::SequenceCheckFail => 0x0B,
            ResponseCode::Unknown(code) => code,
        }
    }

    /// Human-readable name for diagnostics.
    pub fn description(&self) -> &'static str {
        match self {
            ResponseCode::Success => "RESPONSE_SUCCESS",
            ResponseCode::ErrorGeneral => "RESPONSE_ERROR_GENERAL",
            ResponseCode::InvalidAddr => "RESPONSE_INVALID_ADDR",
            ResponseCode::InvalidCmd => "RESPONSE_INVALID_CMD",
            ResponseCode::InvalidPktLength => "RESPONSE_INVALID_PKT_LENGTH",
            ResponseCode::InvalidFlags => "RESPONSE_INVALID_FLAGS",
            ResponseCode::BufferFull => "RESPONSE_BUFFER_FULL",
            ResponseCode::InvalidBlockSize => "RESPONSE_INVALID_BLOCK_SIZE",
            ResponseCode::InvalidIndirectAddr => "RESPONSE_INVALID_INDIRECT_ADDR",
            ResponseCode::CommandTimeout => "RESPONSE_COMMAND_TIMEOUT",
            ResponseCode::SequenceCheckFail => "RESPONSE_SEQUENCE_CHECK_FAIL",
            ResponseCode::Unknown(_) => "(unknown)",
        }
    }
}

fn request_flags(sequence_check: bool) -> u8 {
    let mut flags = REQUEST_FLAGS_ACK_REQUEST;
    if sequence_check {
        flags |= REQUEST_FLAGS_SEQUENCE_CHECK;
    }
    flags
}

/// Build a WR_DWORD request datagram.
pub fn encode_write_request(
    sequence: u16,
    address: u32,
    value: u32,
    sequence_check: bool,
) -> Result<Vec<u8>> {
    let mut serializer = Serializer::new(CONTROL_PACKET_SIZE);
    serializer.append_u8(WR_DWORD)?;
    serializer.append_u8(request_flags(sequence_check))?;
    serializer.append_u16_be(sequence)?;
    serializer.append_u8(0)?; // reserved
    serializer.append_u8(0)?; // reserved
    serializer.append_u32_be(address)?;
    serializer.append_u32_be(value)?;
    Ok(serializer.finish())
}

/// Build a RD_DWORD request datagram.
pub fn encode_read_request(sequence: u16, address: u32, sequence_check: bool) -> Result<Vec<u8>> {
    let mut serializer = Serializer::new(CONTROL_PACKET_SIZE);
    serializer.append_u8(RD_DWORD)?;
    serializer.append_u8(request_flags(sequence_check))?;
    serializer.append_u16_be(sequence)?;
    serializer.append_u8(0)?; // reserved
    serializer.append_u8(0)?; // reserved
    serializer.append_u32_be(address)?;
    Ok(serializer.finish())
}

/// Fixed 5-byte header present on every reply.
#[derive(Debug, Clone, Copy)]
pub struct ReplyHeader {
    /// Echo of the request opcode
    pub opcode: u8,
    /// Echo of the request flags
    pub flags: u8,
    /// Sequence number this reply answers
    pub sequence: u16,
    /// Device response code
    pub response_code: ResponseCode,
}

impl ReplyHeader {
    /// Decode the reply header, leaving `deserializer` positioned at the
    /// start of the opcode-specific payload.
    pub fn decode(deserializer: &mut Deserializer<'_>) -> Result<Self> {
        let opcode = deserializer.next_u8()?;
        let flags = deserializer.next_u8()?;
        let sequence = deserializer.next_u16_be()?;
        let response_code = ResponseCode::from_wire(deserializer.next_u8()?);
        Ok(ReplyHeader {
            opcode,
            flags,
            sequence,
            response_code,
        })
    }
}

/// Payload of a successful RD_DWORD reply.
#[derive(Debug, Clone, Copy)]
pub struct ReadReply {
    /// Address echoed by the device
    pub address: u32,
    /// Register value
    pub value: u32,
    /// Sequence number the device has latched
    pub latched_sequence: u16,
}

impl ReadReply {
    /// Decode the payload following a RD_DWORD reply header. Verifies the
    /// echoed address matches `expected_address`; a mismatch is a
    /// logic-level fault, not a retryable condition.
    pub fn decode(deserializer: &mut Deserializer<'_>, expected_address: u32) -> Result<Self> {
        let _reserved = deserializer.next_u8()?;
        let address = deserializer.next_u32_be()?;
        let value = deserializer.next_u32_be()?;
        let latched_sequence = deserializer.next_u16_be()?;
        if address != expected_address {
            return Err(Error::Consistency(format!(
                "read reply echoed address {address:#x}, expected {expected_address:#x}"
            )));
        }
        Ok(ReadReply {
            address,
            value,
            latched_sequence,
        })
    }
}
