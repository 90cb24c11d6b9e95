//! Boot-complete notification
//!
//! Sent once per BMC boot, typically from a oneshot unit. The CEC can
//! be momentarily unresponsive right after power-on, so the command is
//! retried a few times before giving up.

use anyhow::Result;
use std::thread;
use tracing::warn;

use cecup_common::i2c::commands::CMD_SETTLE_DELAY;
use cecup_common::i2c::{CecBus, CecLink};
use cecup_common::protocol::CommandStatus;

const MAX_RETRIES: u8 = 5;

/// Send BootComplete until the CEC acknowledges it
pub fn run(bus: u8, addr: u8) -> Result<()> {
    let mut device = CecBus::open(bus, addr)?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match send_once(&mut device) {
            Ok(()) => {
                println!("Boot complete acknowledged.");
                return Ok(());
            }
            Err(e) if attempt < MAX_RETRIES => {
                warn!(attempt, error = %e, "BootComplete not acknowledged, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

fn send_once(device: &mut CecBus) -> Result<()> {
    device.boot_complete()?;
    thread::sleep(CMD_SETTLE_DELAY);

    let status = device.last_cmd_status()?;
    if status != CommandStatus::Success {
        anyhow::bail!("BootComplete failed with {}", status.name());
    }
    Ok(())
}
