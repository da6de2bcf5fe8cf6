//! Bounds-checked big-endian serialization primitives
//!
//! All multi-byte integers on the control plane are big-endian. The
//! serializer writes into a caller-sized buffer and refuses to overflow it;
//! the deserializer walks a received datagram and reports underflow instead
//! of panicking on short replies.

use crate::error::{Error, Result};

/// Big-endian writer over a fixed-capacity buffer.
pub struct Serializer {
    buffer: Vec<u8>,
    capacity: usize,
}

impl Serializer {
    /// Create a serializer that refuses to grow past `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Serializer {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buffer.len() + bytes.len() > self.capacity {
            return Err(Error::BufferUnderflow("serializer capacity exceeded"));
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a single byte.
    pub fn append_u8(&mut self, value: u8) -> Result<()> {
        self.append(&[value])
    }

    /// Append a big-endian u16.
    pub fn append_u16_be(&mut self, value: u16) -> Result<()> {
        self.append(&value.to_be_bytes())
    }

    /// Append a big-endian u32.
    pub fn append_u32_be(&mut self, value: u32) -> Result<()> {
        self.append(&value.to_be_bytes())
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the serializer, yielding the written bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Big-endian reader over a received buffer.
pub struct Deserializer<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> Deserializer<'a> {
    /// Create a deserializer over `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Deserializer {
            buffer,
            position: 0,
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.position + count > self.buffer.len() {
            return Err(Error::BufferUnderflow("short buffer"));
        }
        let bytes = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Read a single byte.
    pub fn next_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u16.
    pub fn next_u16_be(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian u32.
    pub fn next_u32_be(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian u64.
    pub fn next_u64_be(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}
