//! CEC wire protocol definitions
//!
//! This module defines the framed packet layout spoken to the CEC over
//! the I2C link, the register map, command codes, status enums and the
//! additive checksum discipline.
//!
//! # Packet Layout
//!
//! Write packets are framed as:
//!
//! ```text
//! [regMsb, regLsb, cksum, verMaj, verMin, cmd, reserved,
//!  len(31..24), len(23..16), len(15..8), len(7..0), payload...]
//! ```
//!
//! The checksum byte is zero at construction and patched with the sum
//! of all following bytes (mod 256) before transmission. Read packets
//! lead with a checksum byte computed over the remaining bytes.
//!
//! Packet construction and response parsing are pure functions so the
//! framing invariants can be tested without bus access.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;
use crate::types::CecVersion;

// ============================================================================
// Register Map
// ============================================================================

/// Command register, written with framed command packets
pub const REG_COMMAND: u16 = 0x0003;

/// CEC firmware version (checksum, major, minor)
pub const REG_VERSION: u16 = 0x0001;

/// Last command status (checksum, lastCmd, statusBit1, statusBit2)
pub const REG_CMD_STATUS: u16 = 0x0004;

/// Firmware update status (checksum, progress, status)
pub const REG_FW_UPDATE: u16 = 0x0005;

/// Attestation challenge response stream
pub const REG_CHALLENGE: u16 = 0x0006;

/// Interrupt query (checksum, bit)
pub const REG_INTERRUPT: u16 = 0x0008;

// ============================================================================
// Command Codes
// ============================================================================

pub const CMD_START_FW_UPDATE: u8 = 0x00;
/// Shared by block transfers and the empty copy-complete notification
pub const CMD_COPY_IMAGE: u8 = 0x01;
pub const CMD_ATTESTATION: u8 = 0x02;
pub const CMD_BOOT_COMPLETE: u8 = 0x03;
pub const CMD_BMC_RESET: u8 = 0x05;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Packet header protocol version
pub const CEC_VERSION_MAJOR: u8 = 0x01;
pub const CEC_VERSION_MINOR: u8 = 0x00;

/// Firmware class carried by BootComplete
pub const FW_CLASS: u8 = 0x00;

/// Firmware identifiers accepted by StartFWUpdate
pub const FW_ID_CEC: u8 = 0x01;
pub const FW_ID_BMC: u8 = 0x04;

/// Image transfer block size in bytes
pub const BLOCK_SIZE: usize = 128;

/// OTA header length inside ROM-wrapped images
pub const OTA_HEADER_SIZE: u32 = 0x130;

/// OTA header offsets selected by total file size
pub const OTA_HEADER_OFFSET_1MB: u64 = 0xFF000;
pub const OTA_HEADER_OFFSET_2MB: u64 = 0x1FF000;
pub const MB_SIZE: u64 = 0x100000;

/// Offset of the little-endian logical size field in the OTA header
pub const OTA_SIZE_FIELD_OFFSET: usize = 0xE8;

/// Challenge nonce length in bytes
pub const NONCE_LEN: usize = 32;

/// Raw ECDSA signature length at the tail of the attestation payload
pub const SIGNATURE_SIZE: usize = 96;

/// Default attestation payload size in bytes
pub const ATTESTATION_PAYLOAD_SIZE: u16 = 657;

/// Checksum byte position in write packets
pub const WRITE_CKSUM_OFFSET: usize = 2;

/// Write packet header length (register selector through length field)
pub const WRITE_HEADER_LEN: usize = 11;

// ============================================================================
// Command Status
// ============================================================================

/// Status codes reported by the CEC for the last command and for the
/// overall controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandStatus {
    Success = 0,
    ErrI2cChecksum = 1,
    ErrCmdLengthMismatch = 2,
    ErrCmdVersionSupported = 3,
    ErrBusy = 4,
    ErrFlashError = 5,
    ErrCmdInvalid = 6,
    ErrCmdInternal = 7,
    ErrPrimaryRegionDegraded = 8,
    ErrSecondaryRegionDegraded = 9,
    ErrRecoveryRegionDegraded = 10,
    ErrPrimarySecondaryMismatch = 11,
    Unknown = 12,
}

impl CommandStatus {
    /// Create a CommandStatus from a raw status byte
    ///
    /// Unassigned values collapse to Unknown.
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => CommandStatus::Success,
            1 => CommandStatus::ErrI2cChecksum,
            2 => CommandStatus::ErrCmdLengthMismatch,
            3 => CommandStatus::ErrCmdVersionSupported,
            4 => CommandStatus::ErrBusy,
            5 => CommandStatus::ErrFlashError,
            6 => CommandStatus::ErrCmdInvalid,
            7 => CommandStatus::ErrCmdInternal,
            8 => CommandStatus::ErrPrimaryRegionDegraded,
            9 => CommandStatus::ErrSecondaryRegionDegraded,
            10 => CommandStatus::ErrRecoveryRegionDegraded,
            11 => CommandStatus::ErrPrimarySecondaryMismatch,
            _ => CommandStatus::Unknown,
        }
    }

    /// Canonical status-string table
    pub fn name(&self) -> &'static str {
        match self {
            CommandStatus::Success => "SUCCESS",
            CommandStatus::ErrI2cChecksum => "ERR_I2C_CHECKSUM",
            CommandStatus::ErrCmdLengthMismatch => "ERR_CMD_LENGTH_MISMATCH",
            CommandStatus::ErrCmdVersionSupported => "ERR_CMD_VERSION_SUPPORTED",
            CommandStatus::ErrBusy => "ERR_BUSY",
            CommandStatus::ErrFlashError => "ERR_FLASH_ERROR",
            CommandStatus::ErrCmdInvalid => "ERR_CMD_INVALID",
            CommandStatus::ErrCmdInternal => "ERR_CMD_INTERNAL",
            CommandStatus::ErrPrimaryRegionDegraded => "ERR_PRIMARY_REGION_DEGRADED",
            CommandStatus::ErrSecondaryRegionDegraded => "ERR_SECONDARY_REGION_DEGRADED",
            CommandStatus::ErrRecoveryRegionDegraded => "ERR_RECOVERY_REGION_DEGRADED",
            CommandStatus::ErrPrimarySecondaryMismatch => "ERR_PRIMARY_SECONDARY_MISMATCH",
            CommandStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Firmware Update Status
// ============================================================================

/// Progress codes reported by the firmware update status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FwUpdateStatus {
    Finish = 0x0A,
    InProgress = 0x0B,
    ErrFirmwareHeader = 0x0C,
    ErrFirmwareIdMismatch = 0x0D,
    Init = 0x16,
    Other = 0xFF,
}

impl FwUpdateStatus {
    /// Create a FwUpdateStatus from a raw status byte
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x0A => FwUpdateStatus::Finish,
            0x0B => FwUpdateStatus::InProgress,
            0x0C => FwUpdateStatus::ErrFirmwareHeader,
            0x0D => FwUpdateStatus::ErrFirmwareIdMismatch,
            0x16 => FwUpdateStatus::Init,
            _ => FwUpdateStatus::Other,
        }
    }
}

// ============================================================================
// Interrupt Status
// ============================================================================

/// Out-of-band interrupt reasons reported by the interrupt register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InterruptStatus {
    UpdateFail = 0x01,
    ResetNow = 0x02,
    ResetLater = 0x03,
    Unknown = 0xFF,
}

impl InterruptStatus {
    /// Create an InterruptStatus from a raw status byte
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01 => InterruptStatus::UpdateFail,
            0x02 => InterruptStatus::ResetNow,
            0x03 => InterruptStatus::ResetLater,
            _ => InterruptStatus::Unknown,
        }
    }
}

// ============================================================================
// Checksum Discipline
// ============================================================================

fn additive_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Patch the checksum byte of a framed write packet
///
/// The checksum covers every byte after the checksum position.
pub fn seal_packet(packet: &mut [u8]) {
    let sum = additive_sum(&packet[WRITE_CKSUM_OFFSET + 1..]);
    packet[WRITE_CKSUM_OFFSET] = sum;
}

/// Validate the leading checksum byte of a read packet
pub fn verify_checksum(packet: &[u8]) -> Result<(), ProtocolError> {
    if packet.is_empty() {
        return Err(ProtocolError::ShortResponse {
            expected: 1,
            got: 0,
        });
    }
    let expected = additive_sum(&packet[1..]);
    if packet[0] != expected {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            received: packet[0],
        });
    }
    Ok(())
}

// ============================================================================
// Packet Builders
// ============================================================================

/// Frame a command packet with the standard header and patched checksum
pub fn command_packet(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let reg = REG_COMMAND.to_be_bytes();
    let len = (payload.len() as u32).to_be_bytes();
    let mut packet = Vec::with_capacity(WRITE_HEADER_LEN + payload.len());
    packet.extend_from_slice(&[
        reg[0],
        reg[1],
        0x00,
        CEC_VERSION_MAJOR,
        CEC_VERSION_MINOR,
        cmd,
        0x00,
    ]);
    packet.extend_from_slice(&len);
    packet.extend_from_slice(payload);
    seal_packet(&mut packet);
    packet
}

/// Build a StartFWUpdate packet for the given image size and firmware id
pub fn start_fw_update_packet(image_size: u32, fw_id: u8) -> Vec<u8> {
    let mut payload = vec![fw_id, 0x00];
    payload.extend_from_slice(&image_size.to_be_bytes());
    command_packet(CMD_START_FW_UPDATE, &payload)
}

/// Build a BootComplete packet announcing the running BMC firmware
pub fn boot_complete_packet() -> Vec<u8> {
    command_packet(CMD_BOOT_COMPLETE, &[FW_CLASS, FW_ID_BMC, 0x00])
}

/// Build one image transfer block
///
/// Full blocks carry BLOCK_SIZE bytes; the final block carries the
/// remainder.
pub fn copy_block_packet(chunk: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if chunk.len() > BLOCK_SIZE {
        return Err(ProtocolError::BlockTooLarge {
            size: chunk.len(),
            max: BLOCK_SIZE,
        });
    }
    Ok(command_packet(CMD_COPY_IMAGE, chunk))
}

/// Build the empty-payload copy complete notification
pub fn copy_image_complete_packet() -> Vec<u8> {
    command_packet(CMD_COPY_IMAGE, &[])
}

/// Build a BMCReset packet
pub fn bmc_reset_packet() -> Vec<u8> {
    command_packet(CMD_BMC_RESET, &[])
}

/// Build an Attestation packet carrying the block-size code and nonce
pub fn attestation_packet(block_code: u8, nonce: &[u8; NONCE_LEN]) -> Vec<u8> {
    let mut payload = vec![block_code, 0x00];
    payload.extend_from_slice(nonce);
    command_packet(CMD_ATTESTATION, &payload)
}

/// Map a requested attestation block size to its wire code
///
/// Unsupported sizes fall back to the 128 byte block.
pub fn attestation_block_code(block_size: u16) -> (u8, u16) {
    match block_size {
        128 => (0x0, 128),
        64 => (0x1, 64),
        48 => (0x2, 48),
        32 => (0x3, 32),
        _ => (0x0, 128),
    }
}

/// Block lengths of a challenge response read in `block_size` chunks
///
/// Full blocks first, the final block carries the remainder. Each
/// block is read with one extra leading checksum byte.
pub fn challenge_block_lens(data_size: u16, block_size: u16) -> Vec<usize> {
    let mut lens = Vec::new();
    let mut remaining = usize::from(data_size);
    let block = usize::from(block_size).max(1);
    while remaining > 0 {
        let len = remaining.min(block);
        lens.push(len);
        remaining -= len;
    }
    lens
}

// ============================================================================
// Response Parsers
// ============================================================================

fn expect_len(buf: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if buf.len() < expected {
        return Err(ProtocolError::ShortResponse {
            expected,
            got: buf.len(),
        });
    }
    Ok(())
}

/// Parse a command status response (register 0x04)
///
/// Layout: checksum, lastCmdSent, statusBit1, statusBit2.
pub fn parse_status_response(buf: &[u8]) -> Result<CommandStatus, ProtocolError> {
    expect_len(buf, 4)?;
    verify_checksum(buf)?;
    Ok(CommandStatus::from_byte(buf[3]))
}

/// Parse a firmware update status response (register 0x05)
///
/// Layout: checksum, progress, status. Returns (progress, status).
pub fn parse_fw_update_response(buf: &[u8]) -> Result<(u8, FwUpdateStatus), ProtocolError> {
    expect_len(buf, 3)?;
    verify_checksum(buf)?;
    Ok((buf[1], FwUpdateStatus::from_byte(buf[2])))
}

/// Parse an interrupt query response (register 0x08)
pub fn parse_interrupt_response(buf: &[u8]) -> Result<InterruptStatus, ProtocolError> {
    expect_len(buf, 2)?;
    verify_checksum(buf)?;
    Ok(InterruptStatus::from_byte(buf[1]))
}

/// Parse a version response (register 0x01)
pub fn parse_version_response(buf: &[u8]) -> Result<CecVersion, ProtocolError> {
    expect_len(buf, 3)?;
    verify_checksum(buf)?;
    Ok(CecVersion {
        major: buf[1],
        minor: buf[2],
    })
}

/// Validate one challenge response block and strip its checksum byte
pub fn parse_challenge_block(buf: &[u8]) -> Result<&[u8], ProtocolError> {
    expect_len(buf, 2)?;
    verify_checksum(buf)?;
    Ok(&buf[1..])
}
