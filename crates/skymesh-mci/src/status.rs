//! MCI status derivation.
//!
//! The MCI status is derived from the multiset of its VM statuses:
//! the dominant status (ties broken by a fixed precedence), a
//! `Partial-` prefix when not unanimous, a `Failed` override whenever
//! any VM failed, and the running proportion `(R:r/n)`.

use skymesh_state::{StatusCount, VmStatus};

/// Fixed precedence used both for counting and for dominant-status
/// tie-breaks.
const ORDER: [VmStatus; 10] = [
    VmStatus::Failed,
    VmStatus::Suspended,
    VmStatus::Running,
    VmStatus::Terminated,
    VmStatus::Creating,
    VmStatus::Suspending,
    VmStatus::Resuming,
    VmStatus::Rebooting,
    VmStatus::Terminating,
    VmStatus::Undefined,
];

fn count_of(counts: &StatusCount, status: VmStatus) -> u32 {
    match status {
        VmStatus::Failed => counts.failed,
        VmStatus::Suspended => counts.suspended,
        VmStatus::Running => counts.running,
        VmStatus::Terminated => counts.terminated,
        VmStatus::Creating => counts.creating,
        VmStatus::Suspending => counts.suspending,
        VmStatus::Resuming => counts.resuming,
        VmStatus::Rebooting => counts.rebooting,
        VmStatus::Terminating => counts.terminating,
        _ => counts.undefined,
    }
}

/// Count VMs by status.
pub fn count(statuses: &[VmStatus]) -> StatusCount {
    let mut counts = StatusCount {
        total: statuses.len() as u32,
        ..StatusCount::default()
    };
    for status in statuses {
        match status {
            VmStatus::Failed => counts.failed += 1,
            VmStatus::Suspended => counts.suspended += 1,
            VmStatus::Running => counts.running += 1,
            VmStatus::Terminated => counts.terminated += 1,
            VmStatus::Creating => counts.creating += 1,
            VmStatus::Suspending => counts.suspending += 1,
            VmStatus::Resuming => counts.resuming += 1,
            VmStatus::Rebooting => counts.rebooting += 1,
            VmStatus::Terminating => counts.terminating += 1,
            // Preparing/Prepared/Complete read as undefined here.
            _ => counts.undefined += 1,
        }
    }
    counts
}

/// Derive the composite MCI status string and the per-status counts.
pub fn derive(statuses: &[VmStatus]) -> (String, StatusCount) {
    let counts = count(statuses);
    let total = counts.total;
    if total == 0 {
        return (String::new(), counts);
    }

    let mut dominant = VmStatus::Undefined;
    let mut dominant_count = 0;
    for status in ORDER {
        let n = count_of(&counts, status);
        if n > dominant_count {
            dominant_count = n;
            dominant = status;
        }
    }

    let running = counts.running;
    let proportion = format!(":{dominant_count} (R:{running}/{total})");
    let mut derived = if dominant_count == total {
        format!("{dominant}{proportion}")
    } else {
        format!("Partial-{dominant}{proportion}")
    };

    // Failures take precedence in the headline.
    if counts.failed > 0 {
        let proportion = format!(":{} (R:{running}/{total})", counts.failed);
        derived = if counts.failed == total {
            format!("{}{proportion}", VmStatus::Failed)
        } else {
            format!("Partial-{}{proportion}", VmStatus::Failed)
        };
    }

    (derived, counts)
}

/// Whether every VM has completed its target (or is terminated), which
/// completes the MCI's own target.
pub fn all_targets_done(targets: &[(VmStatus, VmStatus)]) -> bool {
    targets.iter().all(|(status, target_status)| {
        *target_status == VmStatus::Complete || *status == VmStatus::Terminated
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use VmStatus::*;

    #[test]
    fn unanimous_running() {
        let (status, counts) = derive(&[Running, Running, Running]);
        assert_eq!(status, "Running:3 (R:3/3)");
        assert_eq!(counts.running, 3);
        assert_eq!(counts.total, 3);
    }

    #[test]
    fn single_vm_running() {
        let (status, _) = derive(&[Running]);
        assert_eq!(status, "Running:1 (R:1/1)");
    }

    #[test]
    fn partial_failed_overrides_dominant() {
        let (status, counts) = derive(&[Running, Failed, Running]);
        assert_eq!(status, "Partial-Failed:1 (R:2/3)");
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn all_failed() {
        let (status, _) = derive(&[Failed, Failed]);
        assert_eq!(status, "Failed:2 (R:0/2)");
    }

    #[test]
    fn mixed_without_failure_is_partial_dominant() {
        let (status, _) = derive(&[Running, Running, Suspended]);
        assert_eq!(status, "Partial-Running:2 (R:2/3)");
    }

    #[test]
    fn tie_breaks_follow_precedence() {
        // One Suspended, one Running: Suspended precedes Running in the
        // fixed order, so it wins the tie.
        let (status, _) = derive(&[Suspended, Running]);
        assert_eq!(status, "Partial-Suspended:1 (R:1/2)");
    }

    #[test]
    fn empty_is_empty() {
        let (status, counts) = derive(&[]);
        assert_eq!(status, "");
        assert_eq!(counts.total, 0);
    }

    #[test]
    fn derivation_is_deterministic_and_idempotent() {
        let statuses = [Running, Failed, Creating, Running, Terminated];
        let first = derive(&statuses);
        let second = derive(&statuses);
        assert_eq!(first, second);
    }

    #[test]
    fn derivation_ignores_input_order() {
        let (a, _) = derive(&[Running, Failed, Creating]);
        let (b, _) = derive(&[Creating, Running, Failed]);
        assert_eq!(a, b);
    }

    #[test]
    fn targets_done_accounts_for_terminated() {
        assert!(all_targets_done(&[
            (Running, Complete),
            (Terminated, Terminated),
        ]));
        assert!(!all_targets_done(&[(Creating, Running)]));
        assert!(all_targets_done(&[]));
    }
}
