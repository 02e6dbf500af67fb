//! Status mapping and correction rules.
//!
//! The CSP reports a native status string; [`VmStatus::from_native`]
//! whitelists it, and [`correct_status`] reinterprets ambiguous values
//! in light of the operation the VM is currently carrying out. Some
//! CSPs report nothing at all mid-transition, others report transient
//! states from the previous lifecycle phase.

use skymesh_state::{VmAction, VmStatus};

/// Correct a mapped native status using the in-flight action and the
/// previously stored status.
///
/// `Terminated` is sticky: once a VM is recorded terminated, no native
/// reading revives it.
pub fn correct_status(
    native: VmStatus,
    target_action: VmAction,
    prior: VmStatus,
) -> VmStatus {
    let mut status = native;

    match target_action {
        VmAction::Create => {
            if status == VmStatus::Undefined {
                status = VmStatus::Creating;
            }
            if prior == VmStatus::Failed {
                status = VmStatus::Failed;
            }
        }
        VmAction::Terminate => {
            if status == VmStatus::Undefined {
                status = VmStatus::Terminated;
            }
            if status == VmStatus::Suspending {
                status = VmStatus::Terminating;
            }
        }
        VmAction::Resume => {
            if status == VmStatus::Undefined || status == VmStatus::Creating {
                status = VmStatus::Resuming;
            }
        }
        VmAction::Reboot => {
            // Some CSPs pass through suspend/create-like states while
            // rebooting.
            if matches!(
                status,
                VmStatus::Undefined
                    | VmStatus::Suspending
                    | VmStatus::Suspended
                    | VmStatus::Creating
                    | VmStatus::Resuming
            ) {
                status = VmStatus::Rebooting;
            }
        }
        _ => {}
    }

    if prior == VmStatus::Terminated {
        status = VmStatus::Terminated;
    }

    status
}

/// Whether `from → to` is an edge of the VM state machine (staying put
/// always is). `Failed` is reachable from anywhere; `Terminating` can
/// start from any live state.
pub fn is_valid_transition(from: VmStatus, to: VmStatus) -> bool {
    use VmStatus::*;

    if from == to || to == Failed {
        return true;
    }
    if from == Terminated {
        return false;
    }
    if to == Terminating {
        return true;
    }
    matches!(
        (from, to),
        (Preparing, Prepared)
            | (Prepared, Creating)
            | (Creating, Running)
            | (Running, Suspending)
            | (Suspending, Suspended)
            | (Suspended, Resuming)
            | (Resuming, Running)
            | (Running, Rebooting)
            | (Rebooting, Running)
            | (Terminating, Terminated)
            | (Failed, Terminating)
            | (Undefined, _)
    )
}
