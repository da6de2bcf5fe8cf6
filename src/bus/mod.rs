//! On-device bus controllers (I2C, SPI, GPIO)
//!
//! Each controller is a thin client over register reads and writes; the
//! device exposes one controller block per bus, pin-muxed across what look
//! like independent instances. Interprocess named locks serialize access
//! accordingly.

mod gpio;
mod i2c;
mod spi;

pub use gpio::{Direction, Gpio};
pub use i2c::I2c;
pub use spi::{Spi, SpiConfig};

/// Pack up to four bytes into a data-buffer word, little-endian, zero
/// padded.
fn pack_word(chunk: &[u8]) -> u32 {
    debug_assert!(chunk.len() <= 4);
    let mut bytes = [0u8; 4];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_word() {
        assert_eq!(pack_word(&[]), 0);
        assert_eq!(pack_word(&[0x12]), 0x12);
        assert_eq!(pack_word(&[0x12, 0x34]), 0x3412);
        assert_eq!(pack_word(&[0x12, 0x34, 0x56, 0x78]), 0x7856_3412);
    }
}
