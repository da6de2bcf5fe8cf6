//! SPI controller client

use super::pack_word;
use crate::device::DeviceSession;
use crate::error::{Error, Result};
use crate::timeout::Timeout;
use std::sync::Arc;

// Control register bits
const SPI_START: u32 = 1 << 0;
const SPI_BUSY: u32 = 1 << 8;
// Configuration register bits
const SPI_CFG_CPOL: u32 = 1 << 4;
const SPI_CFG_CPHA: u32 = 1 << 5;

/// The controller records ingress data even while transmitting, so the
/// data buffer must hold the egress bytes plus the expected ingress bytes.
const SPI_BUFFER_SIZE: usize = 288;

/// Bus parameters for one SPI peripheral.
#[derive(Debug, Clone, Copy)]
pub struct SpiConfig {
    /// Chip select line, 0-7
    pub chip_select: u32,
    /// Clock divisor, 0-15
    pub clock_divisor: u32,
    /// Clock polarity
    pub cpol: bool,
    /// Clock phase
    pub cpha: bool,
    /// Transfer width in bits per clock: 1, 2, or 4
    pub width: u32,
}

/// Client for one SPI controller bank.
///
/// Like I2C, a single physical engine sits behind every bank; transactions
/// run under the per-device interprocess lock.
pub struct Spi {
    session: Arc<DeviceSession>,
    reg_control: u32,
    reg_num_bytes: u32,
    reg_spi_cfg: u32,
    reg_num_bytes2: u32,
    reg_data_buffer: u32,
    spi_cfg: u32,
    turnaround_cycles: u32,
}

impl Spi {
    pub(crate) fn new(
        session: Arc<DeviceSession>,
        bus_address: u32,
        config: SpiConfig,
    ) -> Result<Self> {
        if config.clock_divisor >= 16 {
            return Err(Error::InvalidParameter(format!(
                "clock_divisor {} must be less than 16",
                config.clock_divisor
            )));
        }
        if config.chip_select >= 8 {
            return Err(Error::InvalidParameter(format!(
                "chip_select {} must be less than 8",
                config.chip_select
            )));
        }
        let width_bits = match config.width {
            1 => 0,
            2 => 2 << 8,
            4 => 3 << 8,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported SPI width {other}"
                )))
            }
        };
        let mut spi_cfg = config.clock_divisor | (config.chip_select << 12) | width_bits;
        if config.cpol {
            spi_cfg |= SPI_CFG_CPOL;
        }
        if config.cpha {
            spi_cfg |= SPI_CFG_CPHA;
        }
        Ok(Spi {
            session,
            reg_control: bus_address,
            reg_num_bytes: bus_address + 4,
            reg_spi_cfg: bus_address + 8,
            reg_num_bytes2: bus_address + 12,
            reg_data_buffer: bus_address + 16,
            spi_cfg,
            turnaround_cycles: 0,
        })
    }

    /// Bus clock cycles between the command phase and the data phase.
    pub fn set_turnaround_cycles(&mut self, cycles: u32) -> Result<()> {
        if cycles >= 16 {
            return Err(Error::InvalidParameter(format!(
                "turnaround_cycles {cycles} must be less than 16"
            )));
        }
        self.turnaround_cycles = cycles;
        Ok(())
    }

    /// Run one SPI transaction: clock out `command` then `data`, then read
    /// `read_byte_count` bytes back.
    pub fn transaction(
        &self,
        command: &[u8],
        data: &[u8],
        read_byte_count: usize,
        timeout: Option<Timeout>,
    ) -> Result<Vec<u8>> {
        log::debug!(
            "spi_transaction command_len={} data_len={} read_byte_count={}",
            command.len(),
            data.len(),
            read_byte_count
        );
        // num_bytes2 has four bits for the command phase length
        if command.len() >= 16 {
            return Err(Error::InvalidParameter(format!(
                "command of {} bytes exceeds the 15 byte limit",
                command.len()
            )));
        }
        let write_byte_count = command.len() + data.len();
        let buffer_count = write_byte_count + read_byte_count;
        if buffer_count >= SPI_BUFFER_SIZE {
            return Err(Error::InvalidParameter(format!(
                "combined write and read of {buffer_count} bytes exceeds the buffer size {SPI_BUFFER_SIZE}"
            )));
        }

        let lock = self.session.spi_lock()?;
        let _guard = lock.lock()?;
        let mut timeout = timeout.unwrap_or_else(|| self.session.spi_timeout());

        let value = self.read(self.reg_control, &timeout)?;
        if value & SPI_BUSY != 0 {
            return Err(Error::Consistency(format!(
                "SPI controller busy at transaction start, control={value:#x}"
            )));
        }
        self.write(self.reg_spi_cfg, self.spi_cfg, &timeout)?;

        let mut write_bytes = Vec::with_capacity(write_byte_count);
        write_bytes.extend_from_slice(command);
        write_bytes.extend_from_slice(data);
        for (index, chunk) in write_bytes.chunks(4).enumerate() {
            let address = self.reg_data_buffer + (index as u32) * 4;
            self.write(address, pack_word(chunk), &timeout)?;
        }

        let num_bytes = (write_byte_count as u32) | ((read_byte_count as u32) << 16);
        self.write(self.reg_num_bytes, num_bytes, &timeout)?;
        let num_bytes2 = self.turnaround_cycles | ((command.len() as u32) << 8);
        self.write(self.reg_num_bytes2, num_bytes2, &timeout)?;

        // Start the transaction. No retry here: a resend after the engine
        // already latched the strobe would clock the bus twice.
        let acked = self.session.write_uint32_with(
            self.reg_control,
            SPI_START,
            Some(timeout.clone()),
            false,
            None,
        )?;
        if !acked {
            return Err(Error::Consistency(format!(
                "no acknowledgement writing SPI control register {:#x}",
                self.reg_control
            )));
        }

        // Wait for busy to drop, which may be immediately
        loop {
            let value = self.read(self.reg_control, &timeout)?;
            if value & SPI_BUSY == 0 {
                break;
            }
            if !timeout.retry() {
                return Err(Error::Timeout {
                    operation: "spi_transaction",
                    address: self.reg_control,
                });
            }
        }

        // The buffer holds our egress bytes followed by the ingress data;
        // fetch from the word boundary at or below the ingress start.
        let mut raw = vec![0u8; buffer_count + 3];
        let mut offset = write_byte_count & !3;
        while offset < buffer_count {
            let value = self.read(self.reg_data_buffer + offset as u32, &timeout)?;
            raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            offset += 4;
        }
        Ok(raw[write_byte_count..write_byte_count + read_byte_count].to_vec())
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
