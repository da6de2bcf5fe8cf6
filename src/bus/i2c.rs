//! I2C controller client

use super::pack_word;
use crate::device::DeviceSession;
use crate::error::{Error, Result};
use crate::timeout::Timeout;
use std::sync::Arc;

// Control register bits
const I2C_START: u32 = 1 << 0;
const I2C_CORE_EN: u32 = 1 << 1;
const I2C_DONE_CLEAR: u32 = 1 << 4;
const I2C_BUSY: u32 = 1 << 8;
const I2C_DONE: u32 = 1 << 12;

/// 400kHz fast-mode divider setting.
const I2C_CLOCK_400KHZ: u32 = 0b0101;

/// Client for one I2C controller bank.
///
/// The device has a single physical I2C engine behind all banks, so every
/// transaction runs under the per-device interprocess lock.
pub struct I2c {
    session: Arc<DeviceSession>,
    reg_control: u32,
    reg_num_bytes: u32,
    reg_clk_ctrl: u32,
    reg_data_buffer: u32,
}

impl I2c {
    pub(crate) fn new(session: Arc<DeviceSession>, bus_address: u32) -> Self {
        I2c {
            session,
            reg_control: bus_address,
            reg_num_bytes: bus_address + 4,
            reg_clk_ctrl: bus_address + 8,
            reg_data_buffer: bus_address + 16,
        }
    }

    /// Program the controller clock to 400kHz fast mode.
    pub fn set_clock(&self) -> Result<()> {
        self.session
            .write_uint32_with(
                self.reg_clk_ctrl,
                I2C_CLOCK_400KHZ,
                Some(self.session.i2c_timeout()),
                true,
                None,
            )
            .map(|_| ())
    }

    /// Run one I2C transaction: write `write_bytes` to the peripheral at
    /// `peripheral_address`, then read `read_byte_count` bytes back.
    ///
    /// The controller cannot be reset mid-transaction, so a busy engine at
    /// entry is reported as a fault rather than waited out. `timeout`
    /// bounds the whole transaction including every register access inside
    /// it.
    pub fn transaction(
        &self,
        peripheral_address: u32,
        write_bytes: &[u8],
        read_byte_count: usize,
        timeout: Option<Timeout>,
    ) -> Result<Vec<u8>> {
        log::debug!(
            "i2c_transaction peripheral={:#x} write_len={} read_byte_count={}",
            peripheral_address,
            write_bytes.len(),
            read_byte_count
        );
        if peripheral_address >= 0x80 {
            return Err(Error::InvalidParameter(format!(
                "peripheral address {peripheral_address:#x} must be less than 0x80"
            )));
        }
        if write_bytes.len() >= 0x100 {
            return Err(Error::InvalidParameter(format!(
                "write of {} bytes exceeds the 255 byte limit",
                write_bytes.len()
            )));
        }
        if read_byte_count >= 0x100 {
            return Err(Error::InvalidParameter(format!(
                "read of {read_byte_count} bytes exceeds the 255 byte limit"
            )));
        }

        let lock = self.session.i2c_lock()?;
        let _guard = lock.lock()?;
        let mut timeout = timeout.unwrap_or_else(|| self.session.i2c_timeout());

        let value = self.read(self.reg_control, &timeout)?;
        if value & I2C_BUSY != 0 {
            return Err(Error::Consistency(format!(
                "I2C controller busy at transaction start, control={value:#x}"
            )));
        }

        // Address the peripheral and pulse DONE_CLEAR
        let control = (peripheral_address << 16) | I2C_CORE_EN | I2C_DONE_CLEAR;
        self.write(self.reg_control, control, &timeout)?;
        let control = (peripheral_address << 16) | I2C_CORE_EN;
        self.write(self.reg_control, control, &timeout)?;
        let value = self.read(self.reg_control, &timeout)?;
        if value & I2C_DONE != 0 {
            return Err(Error::Consistency(format!(
                "I2C done flag still set after clearing, control={value:#x}"
            )));
        }

        let num_bytes = (write_bytes.len() as u32) | ((read_byte_count as u32) << 8);
        self.write(self.reg_num_bytes, num_bytes, &timeout)?;

        for (index, chunk) in write_bytes.chunks(4).enumerate() {
            let address = self.reg_data_buffer + (index as u32) * 4;
            self.write(address, pack_word(chunk), &timeout)?;
        }

        // Kick the transaction; retry until the engine reports it took
        loop {
            let control = (peripheral_address << 16) | I2C_CORE_EN | I2C_START;
            self.write(self.reg_control, control, &timeout)?;
            let value = self.read(self.reg_control, &timeout)?;
            if value & (I2C_DONE | I2C_BUSY) != 0 {
                break;
            }
            if !timeout.retry() {
                return Err(Error::Timeout {
                    operation: "i2c_transaction",
                    address: peripheral_address,
                });
            }
        }

        // Poll until done
        loop {
            let value = self.read(self.reg_control, &timeout)?;
            if value & I2C_DONE != 0 {
                break;
            }
            if !timeout.retry() {
                return Err(Error::Timeout {
                    operation: "i2c_transaction",
                    address: peripheral_address,
                });
            }
        }

        // Read back whole words, then trim to the requested count
        let word_count = read_byte_count.div_ceil(4);
        let mut reply = Vec::with_capacity(word_count * 4);
        for i in 0..word_count {
            let value = self.read(self.reg_data_buffer + (i as u32) * 4, &timeout)?;
            reply.extend_from_slice(&value.to_le_bytes());
        }
        reply.truncate(read_byte_count);
        Ok(reply)
    }

    fn read(&self, address: u32, timeout: &Timeout) -> Result<u32> {
        self.session
            .read_uint32_with(address, Some(timeout.clone()), None)
    }

    fn write(&self, address: u32, value: u32, timeout: &Timeout) -> Result<()> {
        self.session
            .write_uint32_with(address, value, Some(timeout.clone()), true, None)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BoardId, DeviceInfo, BOARD_I2C_CTRL};
    use crate::transport::MockRegisterFile;

    fn started_session(lock_dir: &std::path::Path) -> (Arc<DeviceSession>, MockRegisterFile) {
        let device = MockRegisterFile::new();
        let info = DeviceInfo {
            peer_ip: "192.168.0.2".parse().unwrap(),
            control_port: 8192,
            serial_number: "i2c-test".to_string(),
            sequence_number_checking: false,
            board_id: Some(BoardId::Lite),
        };
        let session = Arc::new(DeviceSession::new(info).with_lock_dir(lock_dir));
        session
            .start_with_transport(Box::new(device.clone()))
            .unwrap();
        (session, device)
    }

    #[test]
    fn test_transaction_validates_parameters() {
        let lock_dir = tempfile::tempdir().unwrap();
        let (session, _device) = started_session(lock_dir.path());
        let i2c = session.i2c(BOARD_I2C_CTRL);
        assert!(matches!(
            i2c.transaction(0x80, &[], 0, None),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            i2c.transaction(0x20, &[0u8; 256], 0, None),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            i2c.transaction(0x20, &[], 256, None),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_transaction_reads_back_bytes() {
        let lock_dir = tempfile::tempdir().unwrap();
        let (session, device) = started_session(lock_dir.path());

        // Completion bit appears as soon as the engine is started
        device.set_write_hook(Box::new(|registers, address, value| {
            if address == BOARD_I2C_CTRL && value & I2C_START != 0 {
                registers.insert(BOARD_I2C_CTRL, value | I2C_DONE);
            }
        }));
        // Peripheral answers 0x12, 0x34
        device.set_register(BOARD_I2C_CTRL + 16, 0x3412);

        let i2c = session.i2c(BOARD_I2C_CTRL);
        let reply = i2c.transaction(0x20, &[], 2, None).unwrap();
        assert_eq!(reply, vec![0x12, 0x34]);
        assert_eq!(device.register(BOARD_I2C_CTRL + 4), 2 << 8);
    }

    #[test]
    fn test_set_clock_programs_fast_mode() {
        let lock_dir = tempfile::tempdir().unwrap();
        let (session, device) = started_session(lock_dir.path());
        let i2c = session.i2c(BOARD_I2C_CTRL);
        i2c.set_clock().unwrap();
        assert_eq!(device.register(BOARD_I2C_CTRL + 8), 0b0101);
    }

    #[test]
    fn test_busy_controller_is_a_fault() {
        let lock_dir = tempfile::tempdir().unwrap();
        let (session, device) = started_session(lock_dir.path());
        device.set_register(BOARD_I2C_CTRL, I2C_BUSY);
        let i2c = session.i2c(BOARD_I2C_CTRL);
        assert!(matches!(
            i2c.transaction(0x20, &[1], 0, None),
            Err(Error::Consistency(_))
        ));
    }
}
