//! I2C transport and typed command layer for the CEC link

pub mod commands;
pub mod device;

pub use commands::CecLink;
#[cfg(target_os = "linux")]
pub use device::CecBus;
