//! Update manager
//!
//! Entry point for incoming firmware images. Serializes concurrent
//! requests down to at most one live run, drives the state machine
//! across its suspension points (helper unit completion, timers, the
//! CEC interrupt), owns the progress file, and asserts the reboot
//! guard for the lifetime of a run.

pub mod flows;
pub mod machine;
pub mod states;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cecup_common::config::PROGRESS_FILE_NAME;
use cecup_common::error::{FlowError, ImageError};
use cecup_common::i2c::CecLink;
use cecup_common::types::{ActivationState, ProgressRecord, RunStatus, UnitResult};

use crate::events::Event;
use crate::inventory::{InventoryStore, SoftwareObject, CEC_FIRMWARE_ID};
use crate::systemd::{RebootGuard, UnitRunner};
use flows::{detect_kind, flavor_for, MAX_POLL_CHECKS, POLL_INTERVAL};
use machine::{
    JobScheduler, Machine, ProgressSink, RunEnv, RunError, TimerKind, UpdateContext,
};

// ============================================================================
// Progress Reporter
// ============================================================================

/// Writes progress records to the agreed progress file
///
/// The file is rewritten whole on each checkpoint. The last reported
/// percentage is reused for the terminal record of a failed run.
pub struct ProgressReporter {
    path: PathBuf,
    last_pct: u8,
}

impl ProgressReporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path, last_pct: 0 }
    }

    fn write(&self, record: &ProgressRecord) {
        if let Err(e) = std::fs::write(&self.path, record.render()) {
            error!(file = %self.path.display(), error = %e, "failed to write progress file");
        }
    }

    /// Reset the reporter to 0% at the start of a run
    pub fn reset(&mut self) {
        self.last_pct = 0;
        self.write(&ProgressRecord::running(0, ""));
    }

    /// Emit the single terminal record of a run
    pub fn finish(&mut self, ok: bool, msg: &str) {
        let pct = if ok { 100 } else { self.last_pct };
        self.write(&ProgressRecord::finished(ok, pct, msg));
    }
}

impl ProgressSink for ProgressReporter {
    fn progress(&mut self, pct: u8, msg: &str) {
        self.last_pct = pct;
        self.write(&ProgressRecord::running(pct, msg));
    }
}

// ============================================================================
// Job Control
// ============================================================================

/// Spawns helper units and timers, delivering their outcomes back to
/// the manager's event channel
pub struct JobControl {
    runner: Arc<dyn UnitRunner>,
    tx: UnboundedSender<Event>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
}

impl JobControl {
    pub fn new(runner: Arc<dyn UnitRunner>, tx: UnboundedSender<Event>) -> Self {
        Self {
            runner,
            tx,
            timers: HashMap::new(),
        }
    }
}

impl JobScheduler for JobControl {
    fn start_copy_unit(&mut self, unit: &str) -> Result<(), RunError> {
        let runner = self.runner.clone();
        let tx = self.tx.clone();
        let name = unit.to_string();
        info!(unit = %name, "starting copy helper unit");
        tokio::task::spawn_blocking(move || {
            let result = runner.start_and_wait(&name);
            let _ = tx.send(Event::UnitCompleted { unit: name, result });
        });
        Ok(())
    }

    fn arm_timer(&mut self, kind: TimerKind, after: Duration) {
        self.cancel_timer(kind);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Event::Timer(kind));
        });
        self.timers.insert(kind, handle);
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(handle) = self.timers.remove(&kind) {
            handle.abort();
        }
    }
}

// ============================================================================
// Update Manager
// ============================================================================

struct ActiveRun {
    machine: Machine,
    ctx: UpdateContext,
}

pub struct UpdateManager {
    device: Arc<Mutex<Box<dyn CecLink>>>,
    inventory: Arc<InventoryStore>,
    guard: Arc<Mutex<RebootGuard>>,
    reporter: ProgressReporter,
    jobs: JobControl,
    supervisor_tx: UnboundedSender<Event>,
    run: Option<ActiveRun>,
}

impl UpdateManager {
    pub fn new(
        device: Arc<Mutex<Box<dyn CecLink>>>,
        inventory: Arc<InventoryStore>,
        guard: Arc<Mutex<RebootGuard>>,
        runner: Arc<dyn UnitRunner>,
        progress_path: PathBuf,
        event_tx: UnboundedSender<Event>,
        supervisor_tx: UnboundedSender<Event>,
    ) -> Self {
        Self {
            device,
            inventory,
            guard,
            reporter: ProgressReporter::new(progress_path),
            jobs: JobControl::new(runner, event_tx),
            supervisor_tx,
            run: None,
        }
    }

    /// Drain the event channel until the daemon shuts down
    pub async fn run(mut self, mut rx: UnboundedReceiver<Event>) {
        info!("update manager started");
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::ImageArrived(path) => self.submit(path).await,
            Event::UnitCompleted { unit, result } => self.on_unit_completed(&unit, result).await,
            Event::Timer(kind) => self.on_timer(kind).await,
            Event::CecInterrupt => self.on_interrupt().await,
            Event::InventoryChanged => {}
        }
    }

    /// Submit an incoming image for an update run
    async fn submit(&mut self, path: PathBuf) {
        if path.file_name().and_then(|n| n.to_str()) == Some(PROGRESS_FILE_NAME) {
            return;
        }

        if self.run.is_some() {
            warn!(image = %path.display(), "{}", FlowError::AlreadyInProgress);
            remove_image(&path);
            return;
        }

        info!(image = %path.display(), "firmware image received");
        self.guard.lock().await.enable();
        self.reporter.reset();

        let is_file = std::fs::metadata(&path)
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            let msg = ImageError::Missing(path.clone()).to_string();
            self.reject(&path, &msg).await;
            return;
        }

        if self.inventory.any_activating() {
            let msg = FlowError::BmcUpdateInProgress.to_string();
            self.reject(&path, &msg).await;
            return;
        }

        let kind = detect_kind(&path);
        let flavor = flavor_for(kind);
        let machine = match Machine::new(flavor) {
            Ok(machine) => machine,
            Err(e) => {
                self.reject(&path, &e.to_string()).await;
                return;
            }
        };

        let version = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        self.inventory.upsert(SoftwareObject {
            id: CEC_FIRMWARE_ID.to_string(),
            version,
            activation: ActivationState::Activating,
            path: path.clone(),
        });
        let _ = self.supervisor_tx.send(Event::InventoryChanged);

        self.run = Some(ActiveRun {
            machine,
            ctx: UpdateContext::new(path, kind),
        });
        self.drive(flavor.probe_state).await;
    }

    /// Reject a submission before a run context exists
    async fn reject(&mut self, path: &Path, msg: &str) {
        warn!(image = %path.display(), message = msg, "update submission rejected");
        self.reporter.finish(false, msg);
        self.inventory
            .set_activation(CEC_FIRMWARE_ID, ActivationState::Failed);
        self.guard.lock().await.disable();
        remove_image(path);
        let _ = self.supervisor_tx.send(Event::InventoryChanged);
    }

    /// Trigger the machine at a state and settle the aftermath
    async fn drive(&mut self, state: u8) {
        let engine_result = {
            let Some(run) = self.run.as_mut() else { return };
            let mut device = self.device.lock().await;
            let mut env = RunEnv {
                device: &mut **device,
                progress: &mut self.reporter,
                jobs: &mut self.jobs,
            };
            run.machine.trigger(state, &mut run.ctx, &mut env)
        };

        if let Err(err) = engine_result {
            error!(%err, "state engine fault");
            if let Some(run) = self.run.as_mut() {
                run.ctx.fail(err.to_string());
            }
            self.finalize().await;
            return;
        }

        self.post_drive().await;
    }

    /// Decide what the suspended (or finished) machine needs next
    async fn post_drive(&mut self) {
        enum Next {
            Nothing,
            Finalize,
            ArmPoll,
            PollExhausted,
        }

        let next = match self.run.as_ref() {
            None => Next::Nothing,
            Some(run) if run.machine.at_terminal() => Next::Finalize,
            Some(run)
                if run.ctx.result == RunStatus::InProgress
                    && run.machine.current() == run.machine.flavor().poll_state =>
            {
                if run.ctx.poll_count <= MAX_POLL_CHECKS {
                    Next::ArmPoll
                } else {
                    Next::PollExhausted
                }
            }
            Some(_) => Next::Nothing,
        };

        match next {
            Next::Nothing => {}
            Next::Finalize => self.finalize().await,
            Next::ArmPoll => self.jobs.arm_timer(TimerKind::PollTick, POLL_INTERVAL),
            Next::PollExhausted => {
                self.fail_run("firmware update still in progress after polling budget")
                    .await
            }
        }
    }

    async fn on_unit_completed(&mut self, unit: &str, result: UnitResult) {
        let Some(run) = self.run.as_ref() else { return };
        if run.ctx.copy_unit.as_deref() != Some(unit) {
            return;
        }

        // The completion event wins over the armed deadline
        self.jobs.cancel_timer(TimerKind::CopyTimeout);

        match result {
            UnitResult::Done => {
                let flavor = run.machine.flavor();
                if run.machine.current() == flavor.copy_state {
                    self.drive(flavor.resume_state).await;
                }
            }
            other => {
                warn!(unit, result = ?other, "copy helper unit failed");
                self.fail_run("image copy helper failed").await;
            }
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        let Some(run) = self.run.as_ref() else { return };
        let flavor = run.machine.flavor();
        let current = run.machine.current();

        match kind {
            TimerKind::CopyTimeout => {
                warn!(state = run.machine.state_name(), "update deadline expired");
                if Some(current) == flavor.await_state {
                    // The BMC flow polls once when the deadline expires
                    self.drive(flavor.poll_state).await;
                } else if current == flavor.copy_state {
                    self.fail_run("image copy helper timed out").await;
                }
            }
            TimerKind::PollTick => {
                if current == flavor.poll_state {
                    self.drive(flavor.poll_state).await;
                }
            }
        }
    }

    async fn on_interrupt(&mut self) {
        let Some(run) = self.run.as_ref() else { return };
        let flavor = run.machine.flavor();
        if Some(run.machine.current()) == flavor.await_state {
            self.jobs.cancel_timer(TimerKind::CopyTimeout);
            self.drive(flavor.poll_state).await;
        }
    }

    async fn fail_run(&mut self, msg: &str) {
        if let Some(run) = self.run.as_mut() {
            run.ctx.fail(msg);
        }
        self.finalize().await;
    }

    /// Emit the single terminal progress record and activation
    /// transition, release the guard, and drop the context
    async fn finalize(&mut self) {
        let Some(run) = self.run.take() else { return };
        self.jobs.cancel_timer(TimerKind::CopyTimeout);
        self.jobs.cancel_timer(TimerKind::PollTick);

        let ok = run.ctx.result == RunStatus::Succeeded;
        if ok {
            info!(image = %run.ctx.path.display(), "firmware update completed");
        } else {
            warn!(
                image = %run.ctx.path.display(),
                message = %run.ctx.message,
                "firmware update failed"
            );
        }

        self.reporter
            .finish(ok, if ok { "" } else { &run.ctx.message });
        self.inventory.set_activation(
            CEC_FIRMWARE_ID,
            if ok {
                ActivationState::Active
            } else {
                ActivationState::Failed
            },
        );
        self.guard.lock().await.disable();
        remove_image(&run.ctx.path);
        let _ = self.supervisor_tx.send(Event::InventoryChanged);
    }
}

fn remove_image(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(image = %path.display(), error = %e, "failed to remove image file");
        }
    }
}
