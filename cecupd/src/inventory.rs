//! Software inventory consumed by the update subsystem
//!
//! The external object-management surface is out of scope; the daemon
//! consumes its contract through this in-process registry. The daemon
//! publishes the running BMC entry and the CEC firmware entry at
//! startup, and flips the update object's activation as runs terminate.
//! The reboot-guard supervisor enumerates the same registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use cecup_common::types::ActivationState;

/// Inventory id of the currently running BMC firmware
pub const RUNNING_BMC_ID: &str = "bmc-running";

/// Inventory id of the CEC-managed firmware slot updates run against
pub const CEC_FIRMWARE_ID: &str = "cec-firmware";

/// One managed software object
#[derive(Debug, Clone)]
pub struct SoftwareObject {
    pub id: String,
    pub version: String,
    pub activation: ActivationState,
    pub path: PathBuf,
}

/// In-process registry of managed software objects
#[derive(Default)]
pub struct InventoryStore {
    objects: RwLock<HashMap<String, SoftwareObject>>,
}

impl InventoryStore {
    /// Insert or replace a software object
    pub fn upsert(&self, object: SoftwareObject) {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object.id.clone(), object);
    }

    /// Update the activation state of an object
    ///
    /// Returns false when no object with the given id exists.
    pub fn set_activation(&self, id: &str, state: ActivationState) -> bool {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        match objects.get_mut(id) {
            Some(object) => {
                object.activation = state;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all managed objects
    pub fn objects(&self) -> Vec<SoftwareObject> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Whether any object is currently activating
    pub fn any_activating(&self) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|o| o.activation == ActivationState::Activating)
    }
}
