//! Core data types shared by the CEC update daemon and CLI
//!
//! - CecVersion: firmware version reported by the CEC
//! - ActivationState: externally visible state of a firmware object
//! - RunStatus: terminal status of one update run
//! - UnitResult: completion result of a spawned helper unit
//! - ProgressRecord: contents of the progress file

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CEC Version
// ============================================================================

/// Firmware version reported by the CEC version register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CecVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for CecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.major, self.minor)
    }
}

// ============================================================================
// Activation State
// ============================================================================

/// Externally visible activation state of a firmware object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    NotReady,
    Invalid,
    Ready,
    Activating,
    Active,
    Failed,
    Staged,
}

impl ActivationState {
    /// Get human-readable name of the state
    pub fn name(&self) -> &'static str {
        match self {
            ActivationState::NotReady => "NotReady",
            ActivationState::Invalid => "Invalid",
            ActivationState::Ready => "Ready",
            ActivationState::Activating => "Activating",
            ActivationState::Active => "Active",
            ActivationState::Failed => "Failed",
            ActivationState::Staged => "Staged",
        }
    }

    /// States that keep the reboot-guard supervisor timer armed
    pub fn keeps_supervisor_armed(&self) -> bool {
        matches!(
            self,
            ActivationState::Ready
                | ActivationState::Activating
                | ActivationState::Active
                | ActivationState::Staged
        )
    }

    /// States whose objects are probed against live CEC state
    pub fn needs_cec_probe(&self) -> bool {
        matches!(self, ActivationState::Active | ActivationState::Staged)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Run Status
// ============================================================================

/// Terminal status of a single update run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    InProgress,
    Failed,
}

// ============================================================================
// Unit Result
// ============================================================================

/// Completion result of a spawned helper unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitResult {
    Done,
    Failed,
    Dependency,
}

impl UnitResult {
    /// Map a systemd job result string to a UnitResult
    pub fn from_systemd(result: &str) -> Self {
        match result {
            "done" => UnitResult::Done,
            "dependency" => UnitResult::Dependency,
            _ => UnitResult::Failed,
        }
    }
}

// ============================================================================
// Progress Record
// ============================================================================

/// Task state reported in the progress file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    fn as_str(&self) -> &'static str {
        match self {
            TaskState::Running => "Running",
            TaskState::Succeeded => "Firmware update succeeded.",
            TaskState::Failed => "Firmware update failed.",
        }
    }
}

/// One progress file record
///
/// Rendered as the canonical text form consumed by external task
/// trackers:
///
/// ```text
/// TaskState=Running
/// TaskStatus=OK
/// TaskProgress=50
/// CEC info: <optional diagnostic>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub state: TaskState,
    pub progress: u8,
    pub info: String,
}

impl ProgressRecord {
    pub fn running(progress: u8, info: impl Into<String>) -> Self {
        Self {
            state: TaskState::Running,
            progress,
            info: info.into(),
        }
    }

    pub fn finished(ok: bool, progress: u8, info: impl Into<String>) -> Self {
        Self {
            state: if ok {
                TaskState::Succeeded
            } else {
                TaskState::Failed
            },
            progress,
            info: info.into(),
        }
    }

    /// Render the record in the progress file text format
    pub fn render(&self) -> String {
        let status = match self.state {
            TaskState::Failed => "FAILED",
            _ => "OK",
        };
        let mut out = format!(
            "TaskState={}\nTaskStatus={}\nTaskProgress={}\n",
            self.state.as_str(),
            status,
            self.progress
        );
        if !self.info.is_empty() {
            out.push_str("CEC info: ");
            out.push_str(&self.info);
            out.push('\n');
        }
        out
    }
}
