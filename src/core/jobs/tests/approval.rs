//! Risk→approval mapping and the approval gate.

use crate::core::jobs::{
    ApprovalLevel, JobKind, JobQueue, JobStatus, RiskLevel, approval_for, can_transition,
};

fn red_change() -> JobKind {
    JobKind::CodeProposal {
        title: "apply migration".into(),
        rationale: "schema drift".into(),
        target: Some("repo".into()),
    }
}

#[test]
fn approval_mapping_is_pure_and_stable() {
    for _ in 0..3 {
        assert_eq!(approval_for(RiskLevel::Low), ApprovalLevel::Green);
        assert_eq!(approval_for(RiskLevel::Medium), ApprovalLevel::Yellow);
        assert_eq!(approval_for(RiskLevel::High), ApprovalLevel::Red);
    }
}

#[test]
fn red_job_never_auto_executes() {
    // Global auto-approve on; the red job must still be withheld.
    let mut queue = JobQueue::new(true);
    let id = queue.push_with_risk("dangerous", red_change(), RiskLevel::High, vec![]);

    for _ in 0..100 {
        assert!(
            queue.next_executable().is_none(),
            "red job was offered without approval"
        );
    }
    assert_eq!(queue.job(&id).unwrap().status, JobStatus::Pending);
}

#[test]
fn approve_unlocks_red_job() {
    let mut queue = JobQueue::new(true);
    let id = queue.push_with_risk("dangerous", red_change(), RiskLevel::High, vec![]);

    assert!(queue.approve(&id));
    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, id);
    assert_eq!(ready.approval, ApprovalLevel::Red);
}

#[test]
fn reject_is_terminal_and_carries_reason() {
    let mut queue = JobQueue::new(true);
    let id = queue.push_with_risk("dangerous", red_change(), RiskLevel::High, vec![]);

    assert!(queue.reject(&id, "not tonight"));
    let job = queue.job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Rejected);
    assert_eq!(job.rejection_reason.as_deref(), Some("not tonight"));

    // Terminal: cannot be approved or re-rejected afterwards.
    assert!(!queue.approve(&id));
    assert!(!queue.reject(&id, "again"));
    assert!(queue.next_executable().is_none());
}

#[test]
fn yellow_jobs_execute_and_signal_notification() {
    let mut queue = JobQueue::new(true);
    let id = queue.push_with_risk(
        "adhoc",
        JobKind::AdHocTask {
            task_id: "task_1".into(),
        },
        RiskLevel::Medium,
        vec![],
    );

    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, id);
    // The caller uses the approval level to fire the mandated notification.
    assert_eq!(ready.approval, ApprovalLevel::Yellow);
}

#[test]
fn green_jobs_gated_by_global_auto_flag() {
    let mut queue = JobQueue::new(false);
    let id = queue.push("research", JobKind::NoteConsolidation, vec![]);

    assert!(queue.next_executable().is_none());

    // Explicit approval still works with the flag off.
    assert!(queue.approve(&id));
    assert_eq!(queue.next_executable().unwrap().id, id);
}

#[test]
fn awaiting_approval_lists_only_pending_red() {
    let mut queue = JobQueue::new(true);
    let red = queue.push_with_risk("red", red_change(), RiskLevel::High, vec![]);
    queue.push("green", JobKind::NoteConsolidation, vec![]);

    let waiting = queue.awaiting_approval();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id, red);
}

#[test]
fn transition_table_rejects_illegal_moves() {
    assert!(can_transition(JobStatus::Pending, JobStatus::Running));
    assert!(can_transition(JobStatus::Pending, JobStatus::Approved));
    assert!(can_transition(JobStatus::Approved, JobStatus::Running));
    assert!(can_transition(JobStatus::Running, JobStatus::Completed));
    assert!(can_transition(JobStatus::Running, JobStatus::Failed));

    assert!(!can_transition(JobStatus::Pending, JobStatus::Completed));
    assert!(!can_transition(JobStatus::Completed, JobStatus::Running));
    assert!(!can_transition(JobStatus::Rejected, JobStatus::Approved));
    assert!(!can_transition(JobStatus::Blocked, JobStatus::Running));
    assert!(!can_transition(JobStatus::Failed, JobStatus::Pending));
}

#[test]
fn default_risk_tracks_side_effect_surface() {
    assert_eq!(red_change().default_risk(), RiskLevel::High);
    assert_eq!(JobKind::NoteConsolidation.default_risk(), RiskLevel::Low);
    assert_eq!(
        JobKind::AdHocTask {
            task_id: "t".into()
        }
        .default_risk(),
        RiskLevel::Medium
    );
}
