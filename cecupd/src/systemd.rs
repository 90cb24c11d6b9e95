//! Systemd unit glue
//!
//! Unit names, the unit-runner capability the update subsystem starts
//! units through, and the reboot guard. Production shells out to
//! `systemctl`; tests substitute a recording runner.

use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tracing::{error, info};

use cecup_common::types::UnitResult;

/// Unit asserted to block host reboots
pub const REBOOT_GUARD_ENABLE_UNIT: &str = "reboot-guard-enable.service";

/// Unit started to release the reboot block
pub const REBOOT_GUARD_DISABLE_UNIT: &str = "reboot-guard-disable.service";

/// Unit that reboots the host when the CEC requests it
pub const HOST_REBOOT_UNIT: &str = "cec-reboot.service";

/// Template prefix of the image copy helper unit
pub const COPY_UNIT_TEMPLATE: &str = "cec-block-copy@";

// ============================================================================
// Unit Runner
// ============================================================================

/// Starts systemd units on behalf of the update subsystem
pub trait UnitRunner: Send + Sync {
    /// Start a unit without waiting for its job to finish
    fn start(&self, unit: &str) -> io::Result<()>;

    /// Start a unit and block until its job finishes
    fn start_and_wait(&self, unit: &str) -> UnitResult;
}

/// Production unit runner shelling out to systemctl
pub struct SystemdUnits;

impl UnitRunner for SystemdUnits {
    fn start(&self, unit: &str) -> io::Result<()> {
        let status = Command::new("systemctl")
            .args(["start", "--no-block", unit])
            .status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("systemctl start {unit} exited with {status}"),
            ));
        }
        Ok(())
    }

    fn start_and_wait(&self, unit: &str) -> UnitResult {
        match Command::new("systemctl")
            .args(["start", "--wait", unit])
            .status()
        {
            Ok(status) if status.success() => UnitResult::Done,
            Ok(status) => {
                error!(unit, %status, "helper unit failed");
                UnitResult::Failed
            }
            Err(e) => {
                error!(unit, error = %e, "failed to run systemctl");
                UnitResult::Failed
            }
        }
    }
}

// ============================================================================
// Copy Helper Unit Naming
// ============================================================================

/// Derive the copy-helper unit name from image path and logical size
///
/// The instance string is the systemd-escaped form of the helper
/// arguments `-f <path> -s <size>`, so the completion listener can
/// match the unit deterministically.
pub fn copy_unit_name(path: &Path, image_size: u32) -> String {
    let args = format!("-f {} -s {}", path.display(), image_size);
    format!("{}{}.service", COPY_UNIT_TEMPLATE, escape_instance(&args))
}

fn escape_instance(args: &str) -> String {
    let mut out = String::with_capacity(args.len() * 2);
    for ch in args.chars() {
        match ch {
            '-' => out.push_str("\\x2d"),
            ' ' => out.push_str("\\x20"),
            '/' => out.push('-'),
            _ => out.push(ch),
        }
    }
    out
}

// ============================================================================
// Reboot Guard
// ============================================================================

/// Blocks host reboots while firmware activations are in flight
///
/// Enable and disable are idempotent so a supervisor sweep against
/// unchanged inventory leaves external state untouched.
pub struct RebootGuard {
    runner: Arc<dyn UnitRunner>,
    enabled: bool,
}

impl RebootGuard {
    pub fn new(runner: Arc<dyn UnitRunner>) -> Self {
        Self {
            runner,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Assert the reboot guard
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        info!("firmware activating, host reboots are disabled");
        match self.runner.start(REBOOT_GUARD_ENABLE_UNIT) {
            Ok(()) => self.enabled = true,
            Err(e) => error!(error = %e, "failed to assert reboot guard"),
        }
    }

    /// Release the reboot guard
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        info!("firmware activation has ended, host reboots are re-enabled");
        match self.runner.start(REBOOT_GUARD_DISABLE_UNIT) {
            Ok(()) => self.enabled = false,
            Err(e) => error!(error = %e, "failed to release reboot guard"),
        }
    }
}
