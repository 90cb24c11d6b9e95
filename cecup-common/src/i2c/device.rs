//! Low-level I2C transport for the CEC link
//!
//! The CEC speaks a register-selected packet protocol over an
//! SMBus-style link. Reads are combined transactions: the 16-bit
//! big-endian register selector is written first, then the response is
//! read under a repeated start. Writes are single messages whose first
//! two bytes are the register selector.
//!
//! This module is only available on Linux targets.

#![cfg(target_os = "linux")]

use i2cdev::core::{I2CMessage, I2CTransfer};
use i2cdev::linux::{I2CMessageFlags, LinuxI2CDevice, LinuxI2CError, LinuxI2CMessage};
use std::io;

use crate::error::TransportError;

/// I2C transport handle for the CEC
///
/// The bus device stays open for the lifetime of the handle; dropping
/// it closes the file descriptor.
pub struct CecBus {
    device: LinuxI2CDevice,
    path: String,
    addr: u8,
}

impl CecBus {
    /// Open the CEC link on the given bus number and 7-bit address
    pub fn open(bus: u8, addr: u8) -> Result<Self, TransportError> {
        let path = format!("/dev/i2c-{}", bus);
        let device =
            LinuxI2CDevice::new(&path, u16::from(addr)).map_err(|e| TransportError::BusOpen {
                path: path.clone(),
                addr,
                source: io_error(e),
            })?;

        Ok(Self { device, path, addr })
    }

    /// Bus device path, e.g. `/dev/i2c-3`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 7-bit device address
    pub fn addr(&self) -> u8 {
        self.addr
    }

    /// Read a framed response from a register
    ///
    /// Writes the register selector and reads `buf.len()` bytes under a
    /// repeated start, as one atomic multi-message transaction.
    pub fn read_packet(&mut self, reg: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        let selector = reg.to_be_bytes();
        let mut msgs = [
            LinuxI2CMessage::write(&selector),
            LinuxI2CMessage::read(buf)
                .with_flags(I2CMessageFlags::READ | I2CMessageFlags::NO_START),
        ];
        self.device
            .transfer(&mut msgs)
            .map_err(|e| TransportError::Ioctl {
                path: self.path.clone(),
                addr: self.addr,
                reg,
                source: io_error(e),
            })?;
        Ok(())
    }

    /// Write a framed packet
    ///
    /// The packet already carries the register selector in its first
    /// two bytes; `reg` is used for error attribution only.
    pub fn write_packet(&mut self, reg: u16, packet: &[u8]) -> Result<(), TransportError> {
        let mut msgs = [LinuxI2CMessage::write(packet)];
        self.device
            .transfer(&mut msgs)
            .map_err(|e| TransportError::Ioctl {
                path: self.path.clone(),
                addr: self.addr,
                reg,
                source: io_error(e),
            })?;
        Ok(())
    }
}

fn io_error(err: LinuxI2CError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

// Note: Unit tests are omitted because the transport requires a real
// /dev/i2c-* device node. Framing and checksum behavior is covered by
// the protocol module tests; command sequencing is covered by the
// daemon tests against a scripted CecLink implementation.
