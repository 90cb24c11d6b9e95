//! Generic state-dispatch engine for firmware update flows
//!
//! A flow is a static table of state functions indexed by a state
//! number. A state mutates the shared `UpdateContext`, may fire a
//! transition, and returns `Result<(), RunError>`; the driver
//! trampoline loops while a transition was fired by the last state. A
//! failing state marks the context failed with its diagnostic and the
//! engine advances to the flow's terminate state. A state that fires
//! no transition suspends the machine until an external event (helper
//! unit completion, timer expiry, CEC interrupt) triggers it again.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, trace};

use cecup_common::error::{CecError, ImageError};
use cecup_common::i2c::CecLink;
use cecup_common::image::ImageKind;
use cecup_common::types::RunStatus;

/// Hard cap on the number of states a flow may define
pub const MAX_STATE_CAPACITY: usize = 0xFE;

/// Timers a state may arm through the scheduler capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Copy-helper completion deadline
    CopyTimeout,
    /// Firmware update status poll interval
    PollTick,
}

// ============================================================================
// Errors
// ============================================================================

/// Failure raised by a state function
///
/// Never crosses the state boundary: the engine records it in the
/// context and advances to the terminate state.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("CECStatus: ERR_BUSY")]
    CecBusy,

    #[error("CEC update status: {0}")]
    CecStatus(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Device(#[from] CecError),

    #[error("{0}")]
    Other(String),
}

/// Fatal engine faults, distinct from per-run failures
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("state {state} is out of bounds for a flow of {max} states")]
    StateOutOfBounds { state: u8, max: usize },

    #[error("flow defines {count} states, exceeding the capacity of {max}")]
    FlowTooLarge { count: usize, max: usize },
}

// ============================================================================
// Update Context
// ============================================================================

/// Per-run scratch, owned exclusively by the machine driver and
/// destroyed on terminal transition
pub struct UpdateContext {
    pub path: PathBuf,
    pub kind: ImageKind,
    /// Logical image size recorded by the START state
    pub logical_size: Option<u32>,
    /// Copy-helper unit name recorded by the COPY state
    pub copy_unit: Option<String>,
    /// Number of times POLL observed an in-progress status
    pub poll_count: u8,
    /// The CEC asked for an immediate host reset on completion
    pub reset_requested: bool,
    pub result: RunStatus,
    pub message: String,
}

impl UpdateContext {
    pub fn new(path: PathBuf, kind: ImageKind) -> Self {
        Self {
            path,
            kind,
            logical_size: None,
            copy_unit: None,
            poll_count: 0,
            reset_requested: false,
            result: RunStatus::Succeeded,
            message: String::new(),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.result = RunStatus::Failed;
        self.message = message.into();
    }

    pub fn succeed(&mut self, message: impl Into<String>) {
        self.result = RunStatus::Succeeded;
        self.message = message.into();
    }

    pub fn mark_in_progress(&mut self, message: impl Into<String>) {
        self.result = RunStatus::InProgress;
        self.message = message.into();
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Progress reporting capability handed to states
pub trait ProgressSink {
    fn progress(&mut self, pct: u8, msg: &str);
}

/// Helper job and timer capability handed to states
pub trait JobScheduler {
    /// Start the named copy-helper unit; its completion is delivered
    /// back to the driver as a unit event
    fn start_copy_unit(&mut self, unit: &str) -> Result<(), RunError>;

    /// Arm (or re-arm) a timer delivering a timer event on expiry
    fn arm_timer(&mut self, kind: TimerKind, after: Duration);

    /// Cancel an armed timer
    fn cancel_timer(&mut self, kind: TimerKind);
}

/// Narrow environment a state function runs against
pub struct RunEnv<'a> {
    pub device: &'a mut dyn CecLink,
    pub progress: &'a mut dyn ProgressSink,
    pub jobs: &'a mut dyn JobScheduler,
}

// ============================================================================
// Flow Definition
// ============================================================================

/// A state function mutates the context and may fire a transition
pub type StateFn = fn(&mut Machine, &mut UpdateContext, &mut RunEnv) -> Result<(), RunError>;

/// One state table entry
pub struct State {
    pub name: &'static str,
    pub run: StateFn,
}

/// One update flow flavor: its state table plus flow wiring
pub struct Flavor {
    pub name: &'static str,
    pub flow: &'static [State],
    /// Firmware id announced by StartFWUpdate
    pub fw_id: u8,
    /// Deadline armed while the copy helper runs
    pub copy_timeout: Duration,
    pub probe_state: u8,
    pub start_state: u8,
    pub copy_state: u8,
    /// State entered when the copy helper reports completion
    pub resume_state: u8,
    /// State parked waiting for the CEC interrupt or the timer
    pub await_state: Option<u8>,
    pub poll_state: u8,
    pub terminate_state: u8,
}

// ============================================================================
// Machine
// ============================================================================

/// State machine driver
pub struct Machine {
    flavor: &'static Flavor,
    current: u8,
    next: u8,
    fired: bool,
}

impl Machine {
    /// Build a machine for a flavor, parked in its initial state
    pub fn new(flavor: &'static Flavor) -> Result<Self, EngineError> {
        if flavor.flow.len() > MAX_STATE_CAPACITY {
            return Err(EngineError::FlowTooLarge {
                count: flavor.flow.len(),
                max: MAX_STATE_CAPACITY,
            });
        }
        Ok(Self {
            flavor,
            current: 0,
            next: 0,
            fired: false,
        })
    }

    pub fn flavor(&self) -> &'static Flavor {
        self.flavor
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn state_name(&self) -> &'static str {
        self.flavor.flow[self.current as usize].name
    }

    pub fn at_terminal(&self) -> bool {
        self.current == self.flavor.terminate_state
    }

    /// Fire a transition to the given state
    pub fn do_transition(&mut self, next: u8) {
        self.fired = true;
        self.next = next;
    }

    /// Enter the machine at a state and run until no transition fires
    pub fn trigger(
        &mut self,
        state: u8,
        ctx: &mut UpdateContext,
        env: &mut RunEnv,
    ) -> Result<(), EngineError> {
        self.do_transition(state);
        self.run(ctx, env)
    }

    fn run(&mut self, ctx: &mut UpdateContext, env: &mut RunEnv) -> Result<(), EngineError> {
        let flavor = self.flavor;
        while self.fired {
            let idx = self.next;
            if usize::from(idx) >= flavor.flow.len() {
                return Err(EngineError::StateOutOfBounds {
                    state: idx,
                    max: flavor.flow.len(),
                });
            }

            // Terminal states fire no transition, clearing the flag
            self.fired = false;
            self.current = idx;

            let state = &flavor.flow[usize::from(idx)];
            trace!(flow = flavor.name, state = state.name, "running state");

            if let Err(err) = (state.run)(self, ctx, env) {
                error!(flow = flavor.name, state = state.name, %err, "state failed");
                ctx.fail(err.to_string());
                if idx != flavor.terminate_state {
                    self.do_transition(flavor.terminate_state);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(
        _machine: &mut Machine,
        _ctx: &mut UpdateContext,
        _env: &mut RunEnv,
    ) -> Result<(), RunError> {
        Ok(())
    }

    fn advance(
        machine: &mut Machine,
        _ctx: &mut UpdateContext,
        _env: &mut RunEnv,
    ) -> Result<(), RunError> {
        machine.do_transition(2);
        Ok(())
    }

    fn failing(
        _machine: &mut Machine,
        _ctx: &mut UpdateContext,
        _env: &mut RunEnv,
    ) -> Result<(), RunError> {
        Err(RunError::Other("broken state".to_string()))
    }

    fn out_of_bounds(
        machine: &mut Machine,
        _ctx: &mut UpdateContext,
        _env: &mut RunEnv,
    ) -> Result<(), RunError> {
        machine.do_transition(99);
        Ok(())
    }

    static TEST_FLOW: [State; 3] = [
        State {
            name: "ADVANCE",
            run: advance,
        },
        State {
            name: "FAILING",
            run: failing,
        },
        State {
            name: "TERMINATE",
            run: noop,
        },
    ];

    static BAD_FLOW: [State; 3] = [
        State {
            name: "JUMP",
            run: out_of_bounds,
        },
        State {
            name: "UNUSED",
            run: noop,
        },
        State {
            name: "TERMINATE",
            run: noop,
        },
    ];

    static TEST_FLAVOR: Flavor = Flavor {
        name: "test",
        flow: &TEST_FLOW,
        fw_id: 0x01,
        copy_timeout: Duration::from_secs(1),
        probe_state: 0,
        start_state: 0,
        copy_state: 0,
        resume_state: 0,
        await_state: None,
        poll_state: 0,
        terminate_state: 2,
    };

    static BAD_FLAVOR: Flavor = Flavor {
        name: "bad",
        flow: &BAD_FLOW,
        fw_id: 0x01,
        copy_timeout: Duration::from_secs(1),
        probe_state: 0,
        start_state: 0,
        copy_state: 0,
        resume_state: 0,
        await_state: None,
        poll_state: 0,
        terminate_state: 2,
    };

    struct NullDevice;

    impl CecLink for NullDevice {
        fn cec_state(
            &mut self,
        ) -> Result<cecup_common::protocol::CommandStatus, CecError> {
            Ok(cecup_common::protocol::CommandStatus::Success)
        }
        fn last_cmd_status(
            &mut self,
        ) -> Result<cecup_common::protocol::CommandStatus, CecError> {
            Ok(cecup_common::protocol::CommandStatus::Success)
        }
        fn fw_update_status(
            &mut self,
        ) -> Result<cecup_common::protocol::FwUpdateStatus, CecError> {
            Ok(cecup_common::protocol::FwUpdateStatus::Finish)
        }
        fn query_interrupt(
            &mut self,
        ) -> Result<cecup_common::protocol::InterruptStatus, CecError> {
            Ok(cecup_common::protocol::InterruptStatus::ResetLater)
        }
        fn version(&mut self) -> Result<cecup_common::types::CecVersion, CecError> {
            Ok(cecup_common::types::CecVersion { major: 1, minor: 0 })
        }
        fn start_fw_update(&mut self, _image_size: u32, _fw_id: u8) -> Result<(), CecError> {
            Ok(())
        }
        fn copy_image_complete(&mut self) -> Result<(), CecError> {
            Ok(())
        }
        fn boot_complete(&mut self) -> Result<(), CecError> {
            Ok(())
        }
        fn bmc_reset(&mut self) -> Result<(), CecError> {
            Ok(())
        }
    }

    struct NullSink;

    impl ProgressSink for NullSink {
        fn progress(&mut self, _pct: u8, _msg: &str) {}
    }

    struct NullJobs;

    impl JobScheduler for NullJobs {
        fn start_copy_unit(&mut self, _unit: &str) -> Result<(), RunError> {
            Ok(())
        }
        fn arm_timer(&mut self, _kind: TimerKind, _after: Duration) {}
        fn cancel_timer(&mut self, _kind: TimerKind) {}
    }

    fn run_machine(flavor: &'static Flavor, start: u8) -> (Machine, UpdateContext) {
        let mut machine = Machine::new(flavor).unwrap();
        let mut ctx = UpdateContext::new(PathBuf::from("/tmp/img.bin"), ImageKind::Ap);
        let mut device = NullDevice;
        let mut sink = NullSink;
        let mut jobs = NullJobs;
        let mut env = RunEnv {
            device: &mut device,
            progress: &mut sink,
            jobs: &mut jobs,
        };
        machine.trigger(start, &mut ctx, &mut env).unwrap();
        (machine, ctx)
    }

    #[test]
    fn test_trampoline_follows_transitions_to_terminal() {
        let (machine, ctx) = run_machine(&TEST_FLAVOR, 0);
        assert!(machine.at_terminal());
        assert_eq!(machine.state_name(), "TERMINATE");
        assert_eq!(ctx.result, RunStatus::Succeeded);
    }

    #[test]
    fn test_failing_state_marks_context_and_terminates() {
        let (machine, ctx) = run_machine(&TEST_FLAVOR, 1);
        assert!(machine.at_terminal());
        assert_eq!(ctx.result, RunStatus::Failed);
        assert!(ctx.message.contains("broken state"));
    }

    #[test]
    fn test_out_of_bounds_transition_is_fatal() {
        let mut machine = Machine::new(&BAD_FLAVOR).unwrap();
        let mut ctx = UpdateContext::new(PathBuf::from("/tmp/img.bin"), ImageKind::Ap);
        let mut device = NullDevice;
        let mut sink = NullSink;
        let mut jobs = NullJobs;
        let mut env = RunEnv {
            device: &mut device,
            progress: &mut sink,
            jobs: &mut jobs,
        };
        let err = machine.trigger(0, &mut ctx, &mut env).unwrap_err();
        assert!(matches!(err, EngineError::StateOutOfBounds { state: 99, .. }));
    }

    #[test]
    fn test_trigger_out_of_range_entry_is_fatal() {
        let mut machine = Machine::new(&TEST_FLAVOR).unwrap();
        let mut ctx = UpdateContext::new(PathBuf::from("/tmp/img.bin"), ImageKind::Ap);
        let mut device = NullDevice;
        let mut sink = NullSink;
        let mut jobs = NullJobs;
        let mut env = RunEnv {
            device: &mut device,
            progress: &mut sink,
            jobs: &mut jobs,
        };
        assert!(machine.trigger(7, &mut ctx, &mut env).is_err());
    }
}
