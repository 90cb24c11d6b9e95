//! Image copy helper
//!
//! Streams a firmware image to the CEC in 128 byte blocks. The update
//! daemon starts this subcommand as a templated unit whose name it
//! derives from the same file path and size arguments.

use anyhow::{Context, Result};
use std::path::Path;

use cecup_common::i2c::CecBus;

/// Stream the image to the CEC
pub fn run(bus: u8, addr: u8, file: &Path, size: u32) -> Result<()> {
    let mut device = CecBus::open(bus, addr)?;
    device
        .send_image(file, size)
        .with_context(|| format!("transfer of {} failed", file.display()))?;
    println!("Image transfer complete.");
    Ok(())
}
