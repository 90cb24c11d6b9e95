//! CEC interrupt line
//!
//! The CEC signals out-of-band conditions by pulling its interrupt
//! line low. Falling edges are fanned out as events to the update
//! manager and the reboot-guard supervisor.
//!
//! This module is only available on Linux targets.

#![cfg(target_os = "linux")]

use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::events::Event;

/// Subscribe to falling edges on the CEC interrupt pin
///
/// The returned pin owns the interrupt registration and must be kept
/// alive for events to flow.
pub fn spawn_interrupt_listener(
    pin: u8,
    subscribers: Vec<UnboundedSender<Event>>,
) -> Result<InputPin, rppal::gpio::Error> {
    let gpio = Gpio::new()?;
    let mut input = gpio.get(pin)?.into_input_pullup();

    input.set_async_interrupt(Trigger::FallingEdge, move |_level: Level| {
        for tx in &subscribers {
            let _ = tx.send(Event::CecInterrupt);
        }
    })?;

    info!(pin, "listening for CEC interrupt edges");
    Ok(input)
}
