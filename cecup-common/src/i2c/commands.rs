//! Typed CEC command wrappers
//!
//! The `CecLink` trait is the command surface the update flows and the
//! reboot-guard supervisor drive. The Linux implementation on `CecBus`
//! adds the settle delays the CEC hardware requires between a command
//! write and the following status read. Tests implement the trait with
//! a scripted device.

use std::time::Duration;

use crate::error::CecError;
use crate::protocol::{CommandStatus, FwUpdateStatus, InterruptStatus};
use crate::types::CecVersion;

/// Settle delay between a command write and the status poll
pub const CMD_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Settle delay after the final image block
pub const LAST_BLOCK_DELAY: Duration = Duration::from_secs(2);

/// Quiescence after the whole image has been streamed, before the CEC
/// publishes a fresh firmware update status
pub const IMAGE_QUIESCENCE: Duration = Duration::from_secs(3);

/// Settle delay after the Attestation command
pub const ATTEST_SETTLE_DELAY: Duration = Duration::from_millis(5);

/// Retry interval while the CEC reports busy during attestation
pub const ATTEST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum busy retries for the Attestation command
pub const ATTEST_MAX_RETRIES: u8 = 10;

/// Command surface of the CEC
///
/// One method per read register or command packet. Implementations
/// must issue at most one bus transaction at a time.
pub trait CecLink: Send {
    /// Read the controller state (register 0x04, statusBit2)
    fn cec_state(&mut self) -> Result<CommandStatus, CecError>;

    /// Read the status of the last command sent (register 0x04)
    fn last_cmd_status(&mut self) -> Result<CommandStatus, CecError>;

    /// Read the firmware update progress register (0x05)
    fn fw_update_status(&mut self) -> Result<FwUpdateStatus, CecError>;

    /// Query the out-of-band interrupt reason (register 0x08)
    fn query_interrupt(&mut self) -> Result<InterruptStatus, CecError>;

    /// Read the CEC firmware version (register 0x01)
    fn version(&mut self) -> Result<CecVersion, CecError>;

    /// Announce an incoming firmware image of `image_size` bytes
    fn start_fw_update(&mut self, image_size: u32, fw_id: u8) -> Result<(), CecError>;

    /// Notify the CEC that the image copy phase has finished
    fn copy_image_complete(&mut self) -> Result<(), CecError>;

    /// Announce that the BMC has booted
    fn boot_complete(&mut self) -> Result<(), CecError>;

    /// Request a BMC reset from the CEC
    fn bmc_reset(&mut self) -> Result<(), CecError>;
}

#[cfg(target_os = "linux")]
mod bus {
    use std::fs::File;
    use std::io::Read;
    use std::path::Path;
    use std::thread;

    use tracing::{debug, trace};

    use super::*;
    use crate::error::ProtocolError;
    use crate::i2c::device::CecBus;
    use crate::protocol::{
        self, BLOCK_SIZE, NONCE_LEN, REG_CHALLENGE, REG_CMD_STATUS, REG_COMMAND, REG_FW_UPDATE,
        REG_INTERRUPT, REG_VERSION,
    };

    impl CecBus {
        fn read_status(&mut self) -> Result<CommandStatus, CecError> {
            let mut buf = [0u8; 4];
            self.read_packet(REG_CMD_STATUS, &mut buf)?;
            Ok(protocol::parse_status_response(&buf)?)
        }

        /// Stream an image to the CEC in 128 byte blocks
        ///
        /// Full blocks carry `BLOCK_SIZE` bytes; the final block carries
        /// the remainder and is followed by a longer settle delay plus
        /// the 3 s quiescence the CEC needs before it publishes a fresh
        /// update status. A busy status between blocks is treated as
        /// accepted; any other non-success status fails the transfer.
        pub fn send_image(&mut self, path: &Path, image_size: u32) -> Result<(), CecError> {
            let mut data = Vec::with_capacity(image_size as usize);
            File::open(path)?
                .take(u64::from(image_size))
                .read_to_end(&mut data)?;
            data.resize(image_size as usize, 0);

            let total_pages = data.chunks(BLOCK_SIZE).count();
            debug!(image = %path.display(), image_size, total_pages, "streaming image to CEC");

            for (page, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                let last = page + 1 == total_pages;
                let packet = protocol::copy_block_packet(chunk)?;
                self.write_packet(REG_COMMAND, &packet)?;

                thread::sleep(if last {
                    LAST_BLOCK_DELAY
                } else {
                    CMD_SETTLE_DELAY
                });

                let status = self.read_status()?;
                if status != CommandStatus::Success && status != CommandStatus::ErrBusy {
                    return Err(ProtocolError::CommandFailed {
                        command: "CopyBlock",
                        status,
                    }
                    .into());
                }
                trace!(page, total_pages, "image block accepted");
            }

            thread::sleep(IMAGE_QUIESCENCE);
            Ok(())
        }

        /// Send the Attestation command and wait until the CEC accepts it
        ///
        /// Polls the command status after a short settle delay, retrying
        /// up to ATTEST_MAX_RETRIES times at 1 s intervals while the CEC
        /// reports busy.
        pub fn start_attestation(
            &mut self,
            block_code: u8,
            nonce: &[u8; NONCE_LEN],
        ) -> Result<(), CecError> {
            let packet = protocol::attestation_packet(block_code, nonce);
            self.write_packet(REG_COMMAND, &packet)?;

            thread::sleep(ATTEST_SETTLE_DELAY);
            let mut status = self.read_status()?;

            let mut retry = 0;
            while status == CommandStatus::ErrBusy && retry < ATTEST_MAX_RETRIES {
                thread::sleep(ATTEST_RETRY_DELAY);
                status = self.read_status()?;
                retry += 1;
            }

            if status != CommandStatus::Success {
                return Err(ProtocolError::CommandFailed {
                    command: "Attestation",
                    status,
                }
                .into());
            }
            Ok(())
        }

        /// Read one challenge response block of `len` payload bytes
        ///
        /// The leading checksum byte is validated and stripped.
        pub fn read_challenge_block(&mut self, len: usize) -> Result<Vec<u8>, CecError> {
            let mut buf = vec![0u8; len + 1];
            self.read_packet(REG_CHALLENGE, &mut buf)?;
            Ok(protocol::parse_challenge_block(&buf)?.to_vec())
        }
    }

    impl CecLink for CecBus {
        fn cec_state(&mut self) -> Result<CommandStatus, CecError> {
            self.read_status()
        }

        fn last_cmd_status(&mut self) -> Result<CommandStatus, CecError> {
            self.read_status()
        }

        fn fw_update_status(&mut self) -> Result<FwUpdateStatus, CecError> {
            let mut buf = [0u8; 3];
            self.read_packet(REG_FW_UPDATE, &mut buf)?;
            let (_, status) = protocol::parse_fw_update_response(&buf)?;
            Ok(status)
        }

        fn query_interrupt(&mut self) -> Result<InterruptStatus, CecError> {
            let mut buf = [0u8; 2];
            self.read_packet(REG_INTERRUPT, &mut buf)?;
            Ok(protocol::parse_interrupt_response(&buf)?)
        }

        fn version(&mut self) -> Result<CecVersion, CecError> {
            let mut buf = [0u8; 3];
            self.read_packet(REG_VERSION, &mut buf)?;
            Ok(protocol::parse_version_response(&buf)?)
        }

        fn start_fw_update(&mut self, image_size: u32, fw_id: u8) -> Result<(), CecError> {
            let packet = protocol::start_fw_update_packet(image_size, fw_id);
            self.write_packet(REG_COMMAND, &packet)?;
            Ok(())
        }

        fn copy_image_complete(&mut self) -> Result<(), CecError> {
            let packet = protocol::copy_image_complete_packet();
            self.write_packet(REG_COMMAND, &packet)?;
            Ok(())
        }

        fn boot_complete(&mut self) -> Result<(), CecError> {
            let packet = protocol::boot_complete_packet();
            self.write_packet(REG_COMMAND, &packet)?;
            Ok(())
        }

        fn bmc_reset(&mut self) -> Result<(), CecError> {
            let packet = protocol::bmc_reset_packet();
            self.write_packet(REG_COMMAND, &packet)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_delays_match_cec_requirements() {
        assert_eq!(CMD_SETTLE_DELAY, Duration::from_millis(100));
        assert_eq!(LAST_BLOCK_DELAY, Duration::from_secs(2));
        assert_eq!(IMAGE_QUIESCENCE, Duration::from_secs(3));
        assert_eq!(ATTEST_SETTLE_DELAY, Duration::from_millis(5));
        assert_eq!(ATTEST_RETRY_DELAY, Duration::from_secs(1));
        assert_eq!(ATTEST_MAX_RETRIES, 10);
    }
}
