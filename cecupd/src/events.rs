//! Events multiplexed by the daemon's cooperative reactor
//!
//! All suspension points of the update subsystem surface as events on
//! an mpsc channel: an incoming image, a helper unit finishing, an
//! armed timer expiring, a CEC interrupt edge, or an inventory change
//! kicking the supervisor.

use std::path::PathBuf;

use cecup_common::types::UnitResult;

use crate::update::machine::TimerKind;

#[derive(Debug)]
pub enum Event {
    /// A regular file was closed after writing in the image directory
    ImageArrived(PathBuf),

    /// A spawned helper unit finished
    UnitCompleted { unit: String, result: UnitResult },

    /// An armed timer expired
    Timer(TimerKind),

    /// Falling edge on the CEC interrupt line
    CecInterrupt,

    /// A software object changed activation state
    InventoryChanged,
}
