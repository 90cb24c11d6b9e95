//! Concrete update flow flavors
//!
//! The AP/CEC flavor streams the image and polls the CEC directly
//! after the copy helper finishes. The BMC flavor inserts a
//! copy-complete notification whose acknowledgement arrives either as
//! a CEC interrupt or as the armed deadline.
//!
//! State enumeration order must match the order of entries in the
//! state tables.

use std::time::Duration;

use cecup_common::image::ImageKind;
use cecup_common::protocol::{FW_ID_BMC, FW_ID_CEC};

use crate::update::machine::{Flavor, State};
use crate::update::states;

/// Poll interval while the CEC reports an update in progress
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Number of poll timer re-arms before the run is failed
pub const MAX_POLL_CHECKS: u8 = 20;

/// Filename marker selecting the BMC flavor for an incoming image
pub const BMC_IMAGE_MARKER: &str = "bmc";

// AP/CEC flavor: IDLE, PROBE, START, COPY, POLL, TERMINATE
static AP_FLOW: [State; 6] = [
    State {
        name: "IDLE",
        run: states::state_idle,
    },
    State {
        name: "PROBE",
        run: states::state_probe,
    },
    State {
        name: "START",
        run: states::state_start,
    },
    State {
        name: "COPY",
        run: states::state_copy,
    },
    State {
        name: "POLL",
        run: states::state_poll,
    },
    State {
        name: "TERMINATE",
        run: states::state_terminate,
    },
];

pub static AP_FLAVOR: Flavor = Flavor {
    name: "ap",
    flow: &AP_FLOW,
    fw_id: FW_ID_CEC,
    copy_timeout: Duration::from_secs(2100),
    probe_state: 1,
    start_state: 2,
    copy_state: 3,
    resume_state: 4,
    await_state: None,
    poll_state: 4,
    terminate_state: 5,
};

// BMC flavor: IDLE, PROBE, START, COPY, SEND_COPY_COMPLETE, POLL, TERMINATE
static BMC_FLOW: [State; 7] = [
    State {
        name: "IDLE",
        run: states::state_idle,
    },
    State {
        name: "PROBE",
        run: states::state_probe,
    },
    State {
        name: "START",
        run: states::state_start,
    },
    State {
        name: "COPY",
        run: states::state_copy,
    },
    State {
        name: "SEND_COPY_COMPLETE",
        run: states::state_send_copy_complete,
    },
    State {
        name: "POLL",
        run: states::state_poll,
    },
    State {
        name: "TERMINATE",
        run: states::state_terminate,
    },
];

pub static BMC_FLAVOR: Flavor = Flavor {
    name: "bmc",
    flow: &BMC_FLOW,
    fw_id: FW_ID_BMC,
    copy_timeout: Duration::from_secs(2400),
    probe_state: 1,
    start_state: 2,
    copy_state: 3,
    resume_state: 4,
    await_state: Some(4),
    poll_state: 5,
    terminate_state: 6,
};

/// Select the flow flavor for an image kind
pub fn flavor_for(kind: ImageKind) -> &'static Flavor {
    match kind {
        ImageKind::Bmc => &BMC_FLAVOR,
        ImageKind::Ap => &AP_FLAVOR,
    }
}

/// Detect the firmware kind of an incoming image from its file name
pub fn detect_kind(path: &std::path::Path) -> ImageKind {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if stem.contains(BMC_IMAGE_MARKER) {
        ImageKind::Bmc
    } else {
        ImageKind::Ap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_flow_wiring_is_in_bounds() {
        for flavor in [&AP_FLAVOR, &BMC_FLAVOR] {
            let len = flavor.flow.len() as u8;
            for state in [
                flavor.probe_state,
                flavor.start_state,
                flavor.copy_state,
                flavor.resume_state,
                flavor.poll_state,
                flavor.terminate_state,
            ] {
                assert!(state < len, "{}: state {} out of bounds", flavor.name, state);
            }
            if let Some(state) = flavor.await_state {
                assert!(state < len);
            }
            assert_eq!(flavor.terminate_state, len - 1);
        }
    }

    #[test]
    fn test_bmc_flavor_inserts_copy_complete() {
        assert_eq!(BMC_FLOW[4].name, "SEND_COPY_COMPLETE");
        assert_eq!(BMC_FLAVOR.await_state, Some(BMC_FLAVOR.resume_state));
        assert_eq!(AP_FLAVOR.await_state, None);
        assert_eq!(AP_FLAVOR.resume_state, AP_FLAVOR.poll_state);
    }

    #[test]
    fn test_flavor_ids_and_timeouts() {
        assert_eq!(AP_FLAVOR.fw_id, FW_ID_CEC);
        assert_eq!(BMC_FLAVOR.fw_id, FW_ID_BMC);
        assert_eq!(AP_FLAVOR.copy_timeout, Duration::from_secs(2100));
        assert_eq!(BMC_FLAVOR.copy_timeout, Duration::from_secs(2400));
    }

    #[test]
    fn test_detect_kind_from_file_name() {
        assert_eq!(
            detect_kind(Path::new("/tmp/cec_images/bf3-bmc-fw.bin")),
            ImageKind::Bmc
        );
        assert_eq!(
            detect_kind(Path::new("/tmp/cec_images/BMC-update.rom")),
            ImageKind::Bmc
        );
        assert_eq!(
            detect_kind(Path::new("/tmp/cec_images/img.bin")),
            ImageKind::Ap
        );
    }
}
