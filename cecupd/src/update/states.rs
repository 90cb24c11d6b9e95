//! State functions shared by the update flows
//!
//! Both flavors run the same probe, start, copy, poll and terminate
//! logic; the BMC flavor inserts the copy-complete notification
//! between copy and poll. States that wait on external events (helper
//! unit completion, timers, the CEC interrupt) return without firing a
//! transition, suspending the machine.

use std::thread;

use tracing::{debug, info, warn};

use cecup_common::i2c::commands::CMD_SETTLE_DELAY;
use cecup_common::image::ImageDescriptor;
use cecup_common::protocol::{CommandStatus, FwUpdateStatus, InterruptStatus};
use cecup_common::types::RunStatus;

use crate::systemd::copy_unit_name;
use crate::update::machine::{Machine, RunEnv, RunError, TimerKind, UpdateContext};

/// Diagnostic recorded while the CEC still reports an update in flight
pub const UPDATE_IN_PROGRESS_MSG: &str = "firmware update in progress";

/// Initial state; runs are entered at the probe state instead
pub fn state_idle(
    _machine: &mut Machine,
    _ctx: &mut UpdateContext,
    _env: &mut RunEnv,
) -> Result<(), RunError> {
    Ok(())
}

/// Probe the CEC before touching anything
///
/// A busy controller fails the run immediately; any other non-success
/// status fails with the mapped status string.
pub fn state_probe(
    machine: &mut Machine,
    ctx: &mut UpdateContext,
    env: &mut RunEnv,
) -> Result<(), RunError> {
    ctx.poll_count = 0;

    let status = env.device.cec_state()?;
    if status != CommandStatus::Success {
        let err = if status == CommandStatus::ErrBusy {
            RunError::CecBusy
        } else {
            RunError::CecStatus(status.name().to_string())
        };
        env.progress.progress(10, &err.to_string());
        return Err(err);
    }

    env.progress.progress(10, "");
    machine.do_transition(machine.flavor().start_state);
    Ok(())
}

/// Inspect the image and announce the update to the CEC
pub fn state_start(
    machine: &mut Machine,
    ctx: &mut UpdateContext,
    env: &mut RunEnv,
) -> Result<(), RunError> {
    let descriptor = ImageDescriptor::inspect(&ctx.path, ctx.kind)?;
    ctx.logical_size = Some(descriptor.logical_size);
    debug!(
        image = %ctx.path.display(),
        logical_size = descriptor.logical_size,
        "announcing firmware update"
    );

    env.device
        .start_fw_update(descriptor.logical_size, machine.flavor().fw_id)?;

    thread::sleep(CMD_SETTLE_DELAY);

    let status = env.device.last_cmd_status()?;
    if status != CommandStatus::Success {
        let err = RunError::CecStatus(format!("StartFWUpdate failed with {}", status.name()));
        env.progress.progress(20, &err.to_string());
        return Err(err);
    }

    env.progress.progress(20, "");
    machine.do_transition(machine.flavor().copy_state);
    Ok(())
}

/// Start the copy-helper unit and arm its completion deadline
///
/// Suspends until the helper's completion event or the deadline
/// triggers the machine again.
pub fn state_copy(
    machine: &mut Machine,
    ctx: &mut UpdateContext,
    env: &mut RunEnv,
) -> Result<(), RunError> {
    let image_size = ctx
        .logical_size
        .ok_or_else(|| RunError::Other("no image size recorded before copy".to_string()))?;

    let unit = copy_unit_name(&ctx.path, image_size);
    ctx.copy_unit = Some(unit.clone());
    env.jobs.start_copy_unit(&unit)?;

    env.progress
        .progress(50, "CEC Update status: start copy image");
    env.jobs
        .arm_timer(TimerKind::CopyTimeout, machine.flavor().copy_timeout);
    Ok(())
}

/// Notify the CEC that the image copy has finished (BMC flavor only)
///
/// Suspends waiting for the CEC interrupt or the armed deadline.
pub fn state_send_copy_complete(
    machine: &mut Machine,
    _ctx: &mut UpdateContext,
    env: &mut RunEnv,
) -> Result<(), RunError> {
    env.device.copy_image_complete()?;

    thread::sleep(CMD_SETTLE_DELAY);

    let status = env.device.last_cmd_status()?;
    if status != CommandStatus::Success {
        return Err(RunError::CecStatus(format!(
            "CopyImageComplete failed with {}",
            status.name()
        )));
    }

    env.jobs
        .arm_timer(TimerKind::CopyTimeout, machine.flavor().copy_timeout);
    Ok(())
}

/// Poll the firmware update status register
///
/// An in-progress status suspends the machine; the driver re-arms the
/// poll timer within its bounded budget. On finish the interrupt
/// register decides whether an immediate host reset is expected.
pub fn state_poll(
    machine: &mut Machine,
    ctx: &mut UpdateContext,
    env: &mut RunEnv,
) -> Result<(), RunError> {
    env.jobs.cancel_timer(TimerKind::CopyTimeout);

    let status = env.device.fw_update_status()?;
    match status {
        FwUpdateStatus::InProgress => {
            ctx.poll_count += 1;
            ctx.mark_in_progress(UPDATE_IN_PROGRESS_MSG);
            env.progress.progress(90, UPDATE_IN_PROGRESS_MSG);
            Ok(())
        }
        FwUpdateStatus::Finish => {
            match env.device.query_interrupt()? {
                InterruptStatus::UpdateFail => {
                    let err =
                        RunError::CecStatus("firmware update failed after finish".to_string());
                    env.progress.progress(90, &err.to_string());
                    return Err(err);
                }
                InterruptStatus::ResetNow => {
                    debug!("firmware update succeeded, immediate reset expected");
                    ctx.reset_requested = true;
                }
                _ => debug!("firmware update succeeded"),
            }
            ctx.succeed("firmware update succeeded");
            env.progress.progress(90, "");
            machine.do_transition(machine.flavor().terminate_state);
            Ok(())
        }
        other => {
            let err = RunError::CecStatus(format!(
                "firmware update did not finish, status {other:?}"
            ));
            env.progress.progress(90, &err.to_string());
            Err(err)
        }
    }
}

/// Collect the run result; the driver emits the single terminal
/// progress record and activation transition
pub fn state_terminate(
    _machine: &mut Machine,
    ctx: &mut UpdateContext,
    _env: &mut RunEnv,
) -> Result<(), RunError> {
    match ctx.result {
        RunStatus::Failed => {
            warn!(message = %ctx.message, "firmware update failed");
        }
        _ => {
            info!("firmware update succeeded");
            if ctx.reset_requested {
                info!("CEC requested an immediate host reset");
            }
        }
    }
    Ok(())
}
