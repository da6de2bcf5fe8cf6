//! Frame metadata blob decoding
//!
//! The bridge appends a fixed big-endian metadata blob to every received
//! frame. The decoded fields let the data-plane consumer correlate frames
//! with PTP time and detect truncated transfers.

use crate::error::Result;
use crate::protocol::wire::Deserializer;

/// Total size of the metadata region appended to each frame buffer. The
/// serialized fields occupy the first [`FrameMetadata::WIRE_SIZE`] bytes;
/// the remainder is reserved.
pub const METADATA_SIZE: usize = 128;

/// Metadata reported by the device for one received frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Status flags for the frame
    pub flags: u32,
    /// Packet sequence number of the final data-plane packet
    pub psn: u32,
    /// CRC reported by the device
    pub crc: u32,
    /// PTP seconds when the first sample of the frame arrived
    pub timestamp_s: u64,
    /// Nanoseconds part of `timestamp_s`
    pub timestamp_ns: u32,
    /// Total payload bytes written for this frame
    pub bytes_written: u64,
    /// Monotonic frame number
    pub frame_number: u32,
    /// PTP seconds when the metadata packet itself was sent
    pub metadata_s: u64,
    /// Nanoseconds part of `metadata_s`
    pub metadata_ns: u32,
}

impl FrameMetadata {
    /// Serialized size of the populated fields.
    pub const WIRE_SIZE: usize = 48;

    /// Decode a metadata blob. `buffer` must hold at least
    /// [`Self::WIRE_SIZE`] bytes; trailing reserved bytes are ignored.
    pub fn decode(buffer: &[u8]) -> Result<Self> {
        let mut deserializer = Deserializer::new(buffer);
        let metadata = FrameMetadata {
            flags: deserializer.next_u32_be()?,
            psn: deserializer.next_u32_be()?,
            crc: deserializer.next_u32_be()?,
            timestamp_s: deserializer.next_u64_be()?,
            timestamp_ns: deserializer.next_u32_be()?,
            bytes_written: deserializer.next_u64_be()?,
            frame_number: deserializer.next_u32_be()?,
            metadata_s: deserializer.next_u64_be()?,
            metadata_ns: deserializer.next_u32_be()?,
        };
        log::trace!(
            "frame metadata flags={:#x} psn={:#x} crc={:#x} timestamp_s={:#x} \
             timestamp_ns={:#x} bytes_written={:#x} frame_number={:#x}",
            metadata.flags,
            metadata.psn,
            metadata.crc,
            metadata.timestamp_s,
            metadata.timestamp_ns,
            metadata.bytes_written,
            metadata.frame_number
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample_blob() -> Vec<u8> {
        let mut blob = Vec::with_capacity(METADATA_SIZE);
        blob.extend_from_slice(&0x1u32.to_be_bytes()); // flags
        blob.extend_from_slice(&0x1234u32.to_be_bytes()); // psn
        blob.extend_from_slice(&0xCAFEu32.to_be_bytes()); // crc
        blob.extend_from_slice(&1_700_000_000u64.to_be_bytes()); // timestamp_s
        blob.extend_from_slice(&500_000_000u32.to_be_bytes()); // timestamp_ns
        blob.extend_from_slice(&(4096u64).to_be_bytes()); // bytes_written
        blob.extend_from_slice(&99u32.to_be_bytes()); // frame_number
        blob.extend_from_slice(&1_700_000_001u64.to_be_bytes()); // metadata_s
        blob.extend_from_slice(&250_000_000u32.to_be_bytes()); // metadata_ns
        blob.resize(METADATA_SIZE, 0); // reserved padding
        blob
    }

    #[test]
    fn test_decode_fields() {
        let metadata = FrameMetadata::decode(&sample_blob()).unwrap();
        assert_eq!(metadata.flags, 1);
        assert_eq!(metadata.psn, 0x1234);
        assert_eq!(metadata.crc, 0xCAFE);
        assert_eq!(metadata.timestamp_s, 1_700_000_000);
        assert_eq!(metadata.timestamp_ns, 500_000_000);
        assert_eq!(metadata.bytes_written, 4096);
        assert_eq!(metadata.frame_number, 99);
        assert_eq!(metadata.metadata_s, 1_700_000_001);
        assert_eq!(metadata.metadata_ns, 250_000_000);
    }

    #[test]
    fn test_decode_exact_wire_size() {
        let blob = sample_blob();
        assert!(FrameMetadata::decode(&blob[..FrameMetadata::WIRE_SIZE]).is_ok());
    }

    #[test]
    fn test_decode_short_blob_underflows() {
        let blob = sample_blob();
        assert!(matches!(
            FrameMetadata::decode(&blob[..FrameMetadata::WIRE_SIZE - 1]),
            Err(Error::BufferUnderflow(_))
        ));
    }
}
