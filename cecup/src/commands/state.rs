//! CEC state probe

use anyhow::Result;

use cecup_common::i2c::{CecBus, CecLink};

/// Print the CEC controller state
pub fn run(bus: u8, addr: u8) -> Result<()> {
    let mut device = CecBus::open(bus, addr)?;
    let status = device.cec_state()?;
    println!("CEC state: {}", status.name());
    Ok(())
}
