//! Reboot-guard supervisor
//!
//! Cross-references the activation states of managed software objects
//! against live CEC state on a recurring timer, asserting the reboot
//! guard while the CEC is still flashing and releasing it otherwise.
//! A falling edge on the CEC interrupt line is handled out of band:
//! the interrupt reason decides between logging, rebooting the host
//! now, or waiting.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use cecup_common::i2c::CecLink;
use cecup_common::protocol::{CommandStatus, InterruptStatus};

use crate::events::Event;
use crate::inventory::{InventoryStore, RUNNING_BMC_ID};
use crate::systemd::{RebootGuard, UnitRunner, HOST_REBOOT_UNIT};

pub struct Supervisor {
    device: Arc<Mutex<Box<dyn CecLink>>>,
    inventory: Arc<InventoryStore>,
    guard: Arc<Mutex<RebootGuard>>,
    runner: Arc<dyn UnitRunner>,
    os_release: std::path::PathBuf,
    check_interval: Duration,
    /// Observable flag flipped on every interrupt edge
    interrupt_seen: bool,
}

impl Supervisor {
    pub fn new(
        device: Arc<Mutex<Box<dyn CecLink>>>,
        inventory: Arc<InventoryStore>,
        guard: Arc<Mutex<RebootGuard>>,
        runner: Arc<dyn UnitRunner>,
        os_release: std::path::PathBuf,
        check_interval: Duration,
    ) -> Self {
        Self {
            device,
            inventory,
            guard,
            runner,
            os_release,
            check_interval,
            interrupt_seen: false,
        }
    }

    pub fn interrupt_seen(&self) -> bool {
        self.interrupt_seen
    }

    /// Run the supervisor loop
    ///
    /// The periodic timer stays armed while the inventory shows
    /// pending work; otherwise the loop parks until an interrupt edge
    /// or an inventory change wakes it.
    pub async fn run(mut self, mut rx: UnboundedReceiver<Event>) {
        info!("reboot-guard supervisor started");
        let mut armed = true;

        loop {
            let event = if armed {
                tokio::select! {
                    _ = tokio::time::sleep(self.check_interval) => None,
                    event = rx.recv() => match event {
                        Some(event) => Some(event),
                        None => break,
                    },
                }
            } else {
                match rx.recv().await {
                    Some(event) => Some(event),
                    None => break,
                }
            };

            match event {
                None => armed = self.tick().await,
                Some(Event::CecInterrupt) => {
                    self.handle_interrupt().await;
                    armed = true;
                }
                Some(Event::InventoryChanged) => armed = true,
                Some(_) => {}
            }
        }
    }

    /// One supervisor sweep; returns whether the timer stays armed
    pub async fn tick(&mut self) -> bool {
        let functional = match bmc_version_id(&self.os_release) {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "could not determine the running BMC version");
                String::new()
            }
        };

        let mut keep_armed = false;

        for object in self.inventory.objects() {
            // Skip the entry for the firmware this BMC is running
            if object.id == RUNNING_BMC_ID && object.version == functional {
                continue;
            }

            if object.activation.needs_cec_probe() {
                let state = self.device.lock().await.cec_state();
                match state {
                    Ok(CommandStatus::ErrBusy) => self.guard.lock().await.enable(),
                    Ok(_) => self.guard.lock().await.disable(),
                    Err(e) => {
                        error!(object = %object.id, error = %e, "CEC probe failed");
                    }
                }
            }

            if object.activation.keeps_supervisor_armed() {
                keep_armed = true;
            }
        }

        if !keep_armed {
            self.guard.lock().await.disable();
        }
        keep_armed
    }

    /// Handle a falling edge on the CEC interrupt line
    pub async fn handle_interrupt(&mut self) {
        self.interrupt_seen = !self.interrupt_seen;

        let status = self.device.lock().await.query_interrupt();
        match status {
            Ok(InterruptStatus::UpdateFail) => {
                error!("out-of-band firmware update failed");
            }
            Ok(InterruptStatus::ResetNow) => {
                info!("out-of-band firmware update succeeded, immediate reset expected");
                if let Err(e) = self.runner.start(HOST_REBOOT_UNIT) {
                    error!(
                        error = %e,
                        "error rebooting the host; a manual reboot is needed to complete \
                         the image activation"
                    );
                }
            }
            Ok(_) => debug!("out-of-band firmware update succeeded"),
            Err(e) => error!(error = %e, "interrupt query failed"),
        }
    }
}

/// Read the running BMC's VERSION_ID from an os-release file
///
/// Supports quoted and unquoted values.
pub fn bmc_version_id(path: &Path) -> io::Result<String> {
    let contents = std::fs::read_to_string(path)?;
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("VERSION_ID=") {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            if value.is_empty() {
                break;
            }
            return Ok(value.to_string());
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("no VERSION_ID in {}", path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    use cecup_common::error::CecError;
    use cecup_common::protocol::FwUpdateStatus;
    use cecup_common::types::{ActivationState, CecVersion, UnitResult};

    use crate::inventory::SoftwareObject;
    use crate::systemd::{REBOOT_GUARD_DISABLE_UNIT, REBOOT_GUARD_ENABLE_UNIT};

    struct MockCec {
        states: Arc<StdMutex<VecDeque<CommandStatus>>>,
        interrupts: Arc<StdMutex<VecDeque<InterruptStatus>>>,
        probes: Arc<StdMutex<usize>>,
    }

    impl CecLink for MockCec {
        fn cec_state(&mut self) -> Result<CommandStatus, CecError> {
            *self.probes.lock().unwrap() += 1;
            Ok(self
                .states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(CommandStatus::Success))
        }
        fn last_cmd_status(&mut self) -> Result<CommandStatus, CecError> {
            Ok(CommandStatus::Success)
        }
        fn fw_update_status(&mut self) -> Result<FwUpdateStatus, CecError> {
            Ok(FwUpdateStatus::Finish)
        }
        fn query_interrupt(&mut self) -> Result<InterruptStatus, CecError> {
            Ok(self
                .interrupts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(InterruptStatus::ResetLater))
        }
        fn version(&mut self) -> Result<CecVersion, CecError> {
            Ok(CecVersion { major: 1, minor: 0 })
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

    #[derive(Default)]
    struct RecordingRunner {
        started: StdMutex<Vec<String>>,
    }

    impl UnitRunner for RecordingRunner {
        fn start(&self, unit: &str) -> io::Result<()> {
            self.started.lock().unwrap().push(unit.to_string());
            Ok(())
        }
        fn start_and_wait(&self, unit: &str) -> UnitResult {
            self.started.lock().unwrap().push(unit.to_string());
            UnitResult::Done
        }
    }

    struct Fixture {
        supervisor: Supervisor,
        inventory: Arc<InventoryStore>,
        runner: Arc<RecordingRunner>,
        states: Arc<StdMutex<VecDeque<CommandStatus>>>,
        interrupts: Arc<StdMutex<VecDeque<InterruptStatus>>>,
        probes: Arc<StdMutex<usize>>,
        _dir: TempDir,
    }

    fn fixture(os_release: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let release_path = dir.path().join("os-release");
        let mut f = std::fs::File::create(&release_path).unwrap();
        f.write_all(os_release.as_bytes()).unwrap();

        let states: Arc<StdMutex<VecDeque<CommandStatus>>> = Arc::default();
        let interrupts: Arc<StdMutex<VecDeque<InterruptStatus>>> = Arc::default();
        let probes: Arc<StdMutex<usize>> = Arc::default();
        let device: Arc<Mutex<Box<dyn CecLink>>> = Arc::new(Mutex::new(Box::new(MockCec {
            states: states.clone(),
            interrupts: interrupts.clone(),
            probes: probes.clone(),
        })));
        let inventory = Arc::new(InventoryStore::default());
        let runner = Arc::new(RecordingRunner::default());
        let guard = Arc::new(Mutex::new(RebootGuard::new(runner.clone())));
        let supervisor = Supervisor::new(
            device,
            inventory.clone(),
            guard,
            runner.clone(),
            release_path,
            Duration::from_secs(60),
        );
        Fixture {
            supervisor,
            inventory,
            runner,
            states,
            interrupts,
            probes,
            _dir: dir,
        }
    }

    fn object(id: &str, version: &str, activation: ActivationState) -> SoftwareObject {
        SoftwareObject {
            id: id.to_string(),
            version: version.to_string(),
            activation,
            path: PathBuf::new(),
        }
    }

    #[test]
    fn test_bmc_version_id_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("os-release");

        std::fs::write(&path, "NAME=bmc\nVERSION_ID=\"2.8.2-100\"\n").unwrap();
        assert_eq!(bmc_version_id(&path).unwrap(), "2.8.2-100");

        std::fs::write(&path, "VERSION_ID=2.8.2-100\n").unwrap();
        assert_eq!(bmc_version_id(&path).unwrap(), "2.8.2-100");

        std::fs::write(&path, "NAME=bmc\n").unwrap();
        assert!(bmc_version_id(&path).is_err());
    }

    #[tokio::test]
    async fn test_busy_probe_asserts_guard_and_keeps_timer() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.inventory
            .upsert(object("slot-a", "2.9.0", ActivationState::Staged));
        f.states.lock().unwrap().push_back(CommandStatus::ErrBusy);

        assert!(f.supervisor.tick().await);
        assert_eq!(
            f.runner.started.lock().unwrap().as_slice(),
            [REBOOT_GUARD_ENABLE_UNIT]
        );
    }

    #[tokio::test]
    async fn test_second_tick_with_unchanged_inventory_is_a_noop() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.inventory
            .upsert(object("slot-a", "2.9.0", ActivationState::Staged));
        {
            let mut states = f.states.lock().unwrap();
            states.push_back(CommandStatus::ErrBusy);
            states.push_back(CommandStatus::ErrBusy);
        }

        assert!(f.supervisor.tick().await);
        assert!(f.supervisor.tick().await);

        // The guard was asserted exactly once
        assert_eq!(
            f.runner.started.lock().unwrap().as_slice(),
            [REBOOT_GUARD_ENABLE_UNIT]
        );
    }

    #[tokio::test]
    async fn test_idle_cec_releases_guard() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.inventory
            .upsert(object("slot-a", "2.9.0", ActivationState::Active));
        f.states.lock().unwrap().push_back(CommandStatus::ErrBusy);

        assert!(f.supervisor.tick().await);
        // Next sweep sees an idle CEC
        assert!(f.supervisor.tick().await);

        assert_eq!(
            f.runner.started.lock().unwrap().as_slice(),
            [REBOOT_GUARD_ENABLE_UNIT, REBOOT_GUARD_DISABLE_UNIT]
        );
    }

    #[tokio::test]
    async fn test_running_bmc_object_is_skipped() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.inventory
            .upsert(object(RUNNING_BMC_ID, "2.8.2", ActivationState::Active));

        assert!(!f.supervisor.tick().await);
        assert_eq!(*f.probes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_inventory_stops_timer() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.inventory
            .upsert(object("slot-a", "2.9.0", ActivationState::Failed));

        assert!(!f.supervisor.tick().await);
        // Guard was never asserted, so release is a no-op
        assert!(f.runner.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_reset_now_reboots_host() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.interrupts
            .lock()
            .unwrap()
            .push_back(InterruptStatus::ResetNow);

        f.supervisor.handle_interrupt().await;

        assert!(f.supervisor.interrupt_seen());
        assert_eq!(
            f.runner.started.lock().unwrap().as_slice(),
            [HOST_REBOOT_UNIT]
        );
    }

    #[tokio::test]
    async fn test_interrupt_fail_only_logs() {
        let mut f = fixture("VERSION_ID=\"2.8.2\"\n");
        f.interrupts
            .lock()
            .unwrap()
            .push_back(InterruptStatus::UpdateFail);

        f.supervisor.handle_interrupt().await;

        assert!(f.supervisor.interrupt_seen());
        assert!(f.runner.started.lock().unwrap().is_empty());

        // A second edge flips the observable flag back
        f.supervisor.handle_interrupt().await;
        assert!(!f.supervisor.interrupt_seen());
    }
}
