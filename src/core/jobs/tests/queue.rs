//! Dependency ordering and blocking behavior.

use crate::core::jobs::{JobKind, JobQueue, JobStatus};

fn research(subject: &str) -> JobKind {
    JobKind::ResearchQuery {
        subject: subject.to_string(),
        question: format!("What is known about {subject}?"),
    }
}

#[test]
fn jobs_run_in_creation_order_when_independent() {
    let mut queue = JobQueue::new(true);
    let first = queue.push("first", research("a"), vec![]);
    let _second = queue.push("second", research("b"), vec![]);

    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, first);
}

#[test]
fn dependent_job_waits_for_dependency_completion() {
    let mut queue = JobQueue::new(true);
    let dep = queue.push("dep", research("a"), vec![]);
    let child = queue.push("child", research("b"), vec![dep.clone()]);

    // Dependency still pending: only the dependency is offered.
    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, dep);
    assert!(queue.mark_running(&dep));

    // Dependency running: the child must not be offered.
    assert!(queue.next_executable().is_none());

    queue.set_result(&dep, true, "done".into(), vec![]);
    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, child);
}

#[test]
fn failed_dependency_blocks_all_dependents() {
    // J2 and J3 both depend on J1; J1 fails.
    let mut queue = JobQueue::new(true);
    let j1 = queue.push("j1", research("a"), vec![]);
    let j2 = queue.push("j2", research("b"), vec![j1.clone()]);
    let j3 = queue.push("j3", research("c"), vec![j1.clone()]);

    assert!(queue.mark_running(&j1));
    queue.set_result(&j1, false, "boom".into(), vec![]);

    // The scan blocks both dependents and reports zero executable jobs.
    assert!(queue.next_executable().is_none());

    for id in [&j2, &j3] {
        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        assert_eq!(job.blocked_by, vec![j1.clone()]);
    }
}

#[test]
fn blocked_dependency_propagates_transitively() {
    let mut queue = JobQueue::new(true);
    let j1 = queue.push("j1", research("a"), vec![]);
    let j2 = queue.push("j2", research("b"), vec![j1.clone()]);
    let j3 = queue.push("j3", research("c"), vec![j2.clone()]);

    assert!(queue.mark_running(&j1));
    queue.set_result(&j1, false, "boom".into(), vec![]);

    assert!(queue.next_executable().is_none());
    assert_eq!(queue.job(&j2).unwrap().status, JobStatus::Blocked);
    // j2 became blocked, so j3 blocks on the next scan.
    assert!(queue.next_executable().is_none());
    assert_eq!(queue.job(&j3).unwrap().status, JobStatus::Blocked);
    assert_eq!(queue.job(&j3).unwrap().blocked_by, vec![j2]);
}

#[test]
fn diamond_dependency_needs_both_parents() {
    let mut queue = JobQueue::new(true);
    let left = queue.push("left", research("a"), vec![]);
    let right = queue.push("right", research("b"), vec![]);
    let merge = queue.push("merge", research("c"), vec![left.clone(), right.clone()]);

    assert!(queue.mark_running(&left));
    queue.set_result(&left, true, "ok".into(), vec![]);

    // Only one parent done: merge not offered, right is.
    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, right);
    assert!(queue.mark_running(&right));
    queue.set_result(&right, true, "ok".into(), vec![]);

    let ready = queue.next_executable().unwrap();
    assert_eq!(ready.id, merge);
}

#[test]
fn set_result_settles_status_from_success_flag() {
    let mut queue = JobQueue::new(true);
    let id = queue.push("job", research("a"), vec![]);
    assert!(queue.mark_running(&id));
    queue.set_result(&id, true, "output".into(), vec!["findings.json".into()]);

    let job = queue.job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.as_ref().unwrap();
    assert!(result.success);
    assert_eq!(result.artifacts, vec!["findings.json"]);
    assert!(job.finished_at_ms.is_some());
}

#[test]
fn completed_jobs_accept_no_further_transitions() {
    let mut queue = JobQueue::new(true);
    let id = queue.push("job", research("a"), vec![]);
    assert!(queue.mark_running(&id));
    queue.set_result(&id, true, "ok".into(), vec![]);

    assert!(!queue.mark_running(&id));
    assert!(!queue.approve(&id));
    assert!(!queue.reject(&id, "too late"));
    assert_eq!(queue.job(&id).unwrap().status, JobStatus::Completed);
}

#[test]
fn exhausted_once_all_work_is_terminal_or_gated() {
    let mut queue = JobQueue::new(true);
    let a = queue.push("a", research("a"), vec![]);
    queue.push_with_risk(
        "red",
        JobKind::CodeProposal {
            title: "change".into(),
            rationale: "why".into(),
            target: None,
        },
        crate::core::jobs::RiskLevel::High,
        vec![],
    );

    assert!(!queue.is_exhausted());
    assert!(queue.mark_running(&a));
    queue.set_result(&a, true, "ok".into(), vec![]);

    // Only the unapproved red job remains: nothing executable.
    assert!(queue.is_exhausted());
}
