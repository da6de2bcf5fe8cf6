//! GPIO block client

use crate::device::{BoardId, DeviceSession};
use crate::error::{Error, Result};
use std::sync::Arc;

// Register families, banked in groups of 32 pins
const GPIO_OUTPUT_BASE_REGISTER: u32 = 0x0000_000C;
const GPIO_DIRECTION_BASE_REGISTER: u32 = 0x0000_002C;
const GPIO_STATUS_BASE_REGISTER: u32 = 0x0000_008C;
const GPIO_REGISTER_ADDRESS_OFFSET: u32 = 0x4;
const GPIO_BANK_SIZE: u32 = 32;
/// Most pins the register families can address.
const GPIO_PIN_RANGE: u32 = 0x100;

/// Pin direction. In the direction registers a set bit means input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Client for the device GPIO block, sized to the enumerated board.
pub struct Gpio {
    session: Arc<DeviceSession>,
    pin_count: u32,
}

impl Gpio {
    pub(crate) fn new(session: Arc<DeviceSession>, board: BoardId) -> Result<Self> {
        let pin_count = board.gpio_pin_count()?;
        if pin_count > GPIO_PIN_RANGE {
            return Err(Error::InvalidParameter(format!(
                "{pin_count} pins exceeds the addressable range {GPIO_PIN_RANGE}"
            )));
        }
        Ok(Gpio { session, pin_count })
    }

    /// Pins available on this board.
    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        let (bank, pin_bit) = self.locate(pin)?;
        let address = GPIO_DIRECTION_BASE_REGISTER + bank;
        let value = self.session.read_uint32(address)?;
        let value = match direction {
            Direction::In => set_bit(value, pin_bit),
            Direction::Out => clear_bit(value, pin_bit),
        };
        self.session.write_uint32(address, value)?;
        log::debug!("GPIO pin {} direction set to {:?}", pin, direction);
        Ok(())
    }

    pub fn direction(&self, pin: u32) -> Result<Direction> {
        let (bank, pin_bit) = self.locate(pin)?;
        let value = self.session.read_uint32(GPIO_DIRECTION_BASE_REGISTER + bank)?;
        match read_bit(value, pin_bit) {
            1 => Ok(Direction::In),
            _ => Ok(Direction::Out),
        }
    }

    /// Drive an output pin high or low.
    ///
    /// The output latch is write-only; the current pin levels come from
    /// the status register, so the read-modify-write reads status and
    /// writes the output register.
    pub fn set_value(&self, pin: u32, high: bool) -> Result<()> {
        let (bank, pin_bit) = self.locate(pin)?;
        if self.direction(pin)? != Direction::Out {
            return Err(Error::InvalidParameter(format!(
                "GPIO pin {pin} is configured as an input"
            )));
        }
        let value = self.session.read_uint32(GPIO_STATUS_BASE_REGISTER + bank)?;
        let value = if high {
            set_bit(value, pin_bit)
        } else {
            clear_bit(value, pin_bit)
        };
        self.session
            .write_uint32(GPIO_OUTPUT_BASE_REGISTER + bank, value)?;
        log::debug!("GPIO pin {} set to {}", pin, high as u32);
        Ok(())
    }

    /// Current level of a pin, input or output.
    pub fn value(&self, pin: u32) -> Result<bool> {
        let (bank, pin_bit) = self.locate(pin)?;
        let value = self.session.read_uint32(GPIO_STATUS_BASE_REGISTER + bank)?;
        Ok(read_bit(value, pin_bit) != 0)
    }

    /// Map a pin to its bank register offset and bit position.
    fn locate(&self, pin: u32) -> Result<(u32, u32)> {
        if pin >= self.pin_count {
            return Err(Error::InvalidParameter(format!(
                "GPIO pin {pin} out of range, board has {} pins",
                self.pin_count
            )));
        }
        let bank = (pin / GPIO_BANK_SIZE) * GPIO_REGISTER_ADDRESS_OFFSET;
        Ok((bank, pin % GPIO_BANK_SIZE))
    }
}

fn set_bit(value: u32, bit: u32) -> u32 {
    value | (1 << bit)
}

fn clear_bit(value: u32, bit: u32) -> u32 {
    value & !(1 << bit)
}

fn read_bit(value: u32, bit: u32) -> u32 {
    (value >> bit) & 0x1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, BoardId};
    use crate::transport::MockRegisterFile;

    #[test]
    fn test_bit_helpers() {
        assert_eq!(set_bit(0, 0), 1);
        assert_eq!(set_bit(0x10, 31), 0x8000_0010);
        assert_eq!(clear_bit(0xFF, 3), 0xF7);
        assert_eq!(read_bit(0x8, 3), 1);
        assert_eq!(read_bit(0x8, 4), 0);
    }

    fn started_gpio(board_id: BoardId) -> (Gpio, MockRegisterFile) {
        let device = MockRegisterFile::new();
        let info = DeviceInfo {
            peer_ip: "192.168.0.2".parse().unwrap(),
            control_port: 8192,
            serial_number: "gpio-test".to_string(),
            sequence_number_checking: false,
            board_id: Some(board_id),
        };
        let session = Arc::new(DeviceSession::new(info));
        session
            .start_with_transport(Box::new(device.clone()))
            .unwrap();
        let gpio = session.gpio().unwrap();
        (gpio, device)
    }

    #[test]
    fn test_pin_range_per_board() {
        let (gpio, _device) = started_gpio(BoardId::Lite);
        assert_eq!(gpio.pin_count(), 16);
        assert!(matches!(
            gpio.set_direction(16, Direction::Out),
            Err(Error::InvalidParameter(_))
        ));

        let (gpio, _device) = started_gpio(BoardId::Nano);
        assert_eq!(gpio.pin_count(), 54);
        assert!(gpio.set_direction(53, Direction::Out).is_ok());
    }

    #[test]
    fn test_direction_round_trip() {
        let (gpio, device) = started_gpio(BoardId::Nano);
        gpio.set_direction(33, Direction::In).unwrap();
        // Pin 33 lands in the second direction bank, bit 1
        assert_eq!(device.register(GPIO_DIRECTION_BASE_REGISTER + 4), 1 << 1);
        assert_eq!(gpio.direction(33).unwrap(), Direction::In);
        gpio.set_direction(33, Direction::Out).unwrap();
        assert_eq!(gpio.direction(33).unwrap(), Direction::Out);
    }

    #[test]
    fn test_set_value_requires_output_pin() {
        let (gpio, _device) = started_gpio(BoardId::Lite);
        gpio.set_direction(2, Direction::In).unwrap();
        assert!(matches!(
            gpio.set_value(2, true),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_set_value_reads_status_and_writes_output() {
        let (gpio, device) = started_gpio(BoardId::Lite);
        gpio.set_direction(5, Direction::Out).unwrap();
        // Another pin already reads high on the wire
        device.set_register(GPIO_STATUS_BASE_REGISTER, 1 << 3);

        gpio.set_value(5, true).unwrap();
        // The levels seen on status carry over into the output write
        assert_eq!(device.register(GPIO_OUTPUT_BASE_REGISTER), (1 << 3) | (1 << 5));

        // value() reflects the status register, not the output latch
        device.set_register(GPIO_STATUS_BASE_REGISTER, (1 << 3) | (1 << 5));
        assert!(gpio.value(5).unwrap());
    }
}
