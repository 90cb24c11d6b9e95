//! BMC reset request

use anyhow::Result;

use cecup_common::i2c::{CecBus, CecLink};

/// Ask the CEC to reset the BMC
pub fn run(bus: u8, addr: u8) -> Result<()> {
    let mut device = CecBus::open(bus, addr)?;
    device.bmc_reset()?;
    println!("BMC reset requested.");
    Ok(())
}
