//! CEC firmware version readout

use anyhow::Result;

use cecup_common::i2c::{CecBus, CecLink};

/// Print the CEC firmware version
pub fn run(bus: u8, addr: u8) -> Result<()> {
    let mut device = CecBus::open(bus, addr)?;
    let version = device.version()?;
    println!("CEC firmware version: {}", version);
    Ok(())
}
