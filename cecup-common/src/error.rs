//! Error types for the CEC update daemon and CLI
//!
//! This module provides the error type hierarchy for the secure update
//! subsystem:
//! - CecError: Top-level error used across daemon and CLI
//! - TransportError: Raw I2C bus errors
//! - ProtocolError: Framing and command-status errors
//! - ImageError: Firmware image validation errors
//! - FlowError: Update submission rejections
//! - AttestationError: Challenge-response failures
//! - ConfigError: Configuration loading errors (re-exported from config)

use std::io;
use std::path::PathBuf;

use crate::protocol::CommandStatus;

pub use crate::config::ConfigError;

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type used throughout the update subsystem
#[derive(Debug, thiserror::Error)]
pub enum CecError {
    /// I2C transport error
    #[error("I2C transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol framing or command error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Firmware image error
    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// Update submission rejected
    #[error("update rejected: {0}")]
    Flow(#[from] FlowError),

    /// Attestation failure
    #[error("attestation error: {0}")]
    Attestation(#[from] AttestationError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Transport Error
// ============================================================================

/// Errors raised by the raw I2C transport
///
/// Every variant carries the bus device path and the 7-bit device
/// address so failures can be attributed to a concrete bus endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the I2C bus device
    #[error("failed to open I2C device {path} (address 0x{addr:02X})")]
    BusOpen {
        path: String,
        addr: u8,
        #[source]
        source: io::Error,
    },

    /// The multi-message I2C_RDWR ioctl failed
    #[error("I2C transfer failed on {path} (address 0x{addr:02X}, register 0x{reg:04X})")]
    Ioctl {
        path: String,
        addr: u8,
        reg: u16,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Protocol Error
// ============================================================================

/// Errors in CEC packet framing and command execution
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Response checksum did not match the packet body
    #[error("checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch { expected: u8, received: u8 },

    /// Response was shorter than the fixed packet layout requires
    #[error("short response: expected {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },

    /// Copy block exceeds the transfer block size
    #[error("block of {size} bytes exceeds the maximum of {max}")]
    BlockTooLarge { size: usize, max: usize },

    /// A command completed with a non-success status
    #[error("{command} failed with status {status}")]
    CommandFailed {
        command: &'static str,
        status: CommandStatus,
    },
}

// ============================================================================
// Image Error
// ============================================================================

/// Firmware image validation errors
///
/// All of these are detected before any I2C command is issued.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Image file does not exist or is not a regular file
    #[error("image file does not exist: {0}")]
    Missing(PathBuf),

    /// Image file is smaller than the OTA header
    #[error("image of {size} bytes is smaller than the {min} byte minimum")]
    TooSmall { size: u64, min: u64 },

    /// File extension is neither .bin nor .rom
    #[error("invalid image file format: {0}")]
    BadExtension(PathBuf),

    /// OTA header could not be read at the expected offset
    #[error("bad OTA header: {0}")]
    BadHeader(String),
}

// ============================================================================
// Flow Error
// ============================================================================

/// Update submission rejections
///
/// These reject the request before a run context is allocated.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Another firmware update run is live
    #[error("a firmware update is already in progress")]
    AlreadyInProgress,

    /// The inventory shows a BMC image activation in flight
    #[error("a BMC firmware update has been triggered and is in progress")]
    BmcUpdateInProgress,
}

// ============================================================================
// Attestation Error
// ============================================================================

/// Challenge-response attestation failures
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// Supplied nonce is not 32 hex-encoded bytes
    #[error("invalid challenge nonce: {0}")]
    BadNonce(String),

    /// The response payload did not echo the challenge nonce
    #[error("response payload does not start with the challenge nonce")]
    NonceMismatch,

    /// Signature could not be reassembled or did not verify
    #[error("signature validation failure: {0}")]
    SignatureInvalid(String),

    /// Reading or writing a payload file failed
    #[error("payload I/O failed: {0}")]
    PayloadIo(#[from] io::Error),
}

// ============================================================================
// Result Type Aliases
// ============================================================================

/// Result type using CecError
pub type Result<T> = std::result::Result<T, CecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cec_error_from_transport_error() {
        let err = TransportError::BusOpen {
            path: "/dev/i2c-3".to_string(),
            addr: 0x55,
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        };
        let top: CecError = err.into();
        assert!(matches!(top, CecError::Transport(_)));
        let msg = top.to_string();
        assert!(msg.contains("/dev/i2c-3"));
        assert!(msg.contains("0x55"));
    }

    #[test]
    fn test_checksum_mismatch_message() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xAB,
            received: 0x12,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xAB"));
        assert!(msg.contains("0x12"));
    }

    #[test]
    fn test_command_failed_carries_status_name() {
        let err = ProtocolError::CommandFailed {
            command: "StartFWUpdate",
            status: CommandStatus::ErrBusy,
        };
        let msg = err.to_string();
        assert!(msg.contains("StartFWUpdate"));
        assert!(msg.contains("ERR_BUSY"));
    }

    #[test]
    fn test_image_too_small_message() {
        let err = ImageError::TooSmall {
            size: 100,
            min: 0x130,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("304"));
    }

    #[test]
    fn test_flow_errors_are_descriptive() {
        assert!(
            FlowError::AlreadyInProgress
                .to_string()
                .contains("already in progress")
        );
        assert!(FlowError::BmcUpdateInProgress.to_string().contains("BMC"));
    }

    #[test]
    fn test_error_chain_propagation() {
        fn inner() -> std::result::Result<(), ProtocolError> {
            Err(ProtocolError::ShortResponse {
                expected: 4,
                got: 2,
            })
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert!(matches!(err, CecError::Protocol(_)));
    }
}
