//! Workstream balance auditor against the in-memory backend.

use chrono::TimeZone;
use chrono::Utc;
use opsgate_core::backend::{BackendOp, IssueBackend, MemoryBackend};
use opsgate_core::balance::{
    BalanceAuditor, BalanceMode, BalanceReport, Classifier, Remediation, WorkstreamTally,
};
use opsgate_core::config::BalanceConfig;
use opsgate_core::model::ItemState;
use opsgate_core::{ExitKind, OpsError};

fn backend() -> MemoryBackend {
    let now = Utc
        .with_ymd_and_hms(2026, 2, 26, 20, 0, 0)
        .single()
        .expect("ts");
    MemoryBackend::new("ops-bot", now)
}

fn audit(backend: &MemoryBackend, mode: BalanceMode) -> Result<BalanceReport, OpsError> {
    let config = BalanceConfig::default();
    let classifier = Classifier::from_config(&config).expect("classifier");
    BalanceAuditor {
        backend,
        config: &config,
        classifier: &classifier,
        mode,
    }
    .run()
}

fn imbalanced_inventory(b: &MemoryBackend) {
    b.insert_item(1, "Implement geocoding API", "", &["backlog"]);
    b.insert_item(2, "Refactor scoring service", "", &["backlog"]);
    b.insert_item(3, "Update operations runbook", "", &["backlog"]);
}

#[test]
fn imbalance_creates_one_remediation_item() {
    let b = backend();
    imbalanced_inventory(&b);

    let report = audit(&b, BalanceMode::Apply).expect("audit");

    assert_eq!(
        report.tally,
        WorkstreamTally {
            development: 2,
            documentation: 1,
            testing: 0
        }
    );
    assert!(report.imbalanced);
    assert_eq!(report.exit_kind(), ExitKind::Detected);
    let created = b.created();
    assert_eq!(created.len(), 1);
    let item = b.item(created[0]).expect("remediation");
    assert!(item.title.contains("workstream balance"));
    for label in ["backlog", "priority:P0", "status:todo"] {
        assert!(item.has_label(label), "{label}");
    }
    assert!(item.body.contains("development: 2"));
    assert!(item.body.contains("documentation: 1"));
    assert!(item.body.contains("testing: 0"));
    assert!(matches!(report.remediation, Remediation::Created { .. }));
}

#[test]
fn second_run_does_not_duplicate() {
    let b = backend();
    imbalanced_inventory(&b);

    audit(&b, BalanceMode::Apply).expect("first");
    let second = audit(&b, BalanceMode::Apply).expect("second");

    assert_eq!(b.created().len(), 1);
    assert!(matches!(second.remediation, Remediation::AlreadyOpen { .. }));
    assert_eq!(second.exit_kind(), ExitKind::Detected);
    assert_eq!(
        second.tally.development, 2,
        "remediation item must not be tallied"
    );
}

#[test]
fn substrings_do_not_change_the_tally() {
    let b = backend();
    b.insert_item(1, "Implement export API", "", &[]);
    b.insert_item(2, "Write deployment guide", "", &[]);
    b.insert_item(3, "Add regression tests", "", &[]);
    let baseline = audit(&b, BalanceMode::ReportOnly).expect("baseline").tally;

    b.insert_item(4, "Clarify guidance for attestation", "", &[]);
    let report = audit(&b, BalanceMode::ReportOnly).expect("report");

    assert_eq!(report.tally, baseline);
    assert_eq!(report.unclassified, 1);
}

#[test]
fn blocked_and_auto_items_are_excluded() {
    let b = backend();
    b.insert_item(1, "Implement API", "", &["status:blocked"]);
    b.insert_item(2, "Implement service", "", &["crawler:auto"]);
    b.insert_item(3, "Write docs", "", &[]);

    let report = audit(&b, BalanceMode::ReportOnly).expect("report");

    assert_eq!(report.excluded, 2);
    assert_eq!(report.tally.development, 0);
    assert_eq!(report.tally.documentation, 1);
    assert!(!report.imbalanced);
}

#[test]
fn balanced_inventory_closes_open_remediation() {
    let b = backend();
    imbalanced_inventory(&b);
    audit(&b, BalanceMode::Apply).expect("create");
    let remediation = b.created()[0];

    b.insert_item(10, "Add e2e smoke tests", "", &[]);
    b.insert_item(11, "Stability testing for crawler", "", &[]);
    let report = audit(&b, BalanceMode::Apply).expect("close");

    assert!(!report.imbalanced);
    assert_eq!(
        report.remediation,
        Remediation::Closed {
            number: remediation
        }
    );
    assert_eq!(
        b.item(remediation).expect("item").state,
        ItemState::Closed
    );
    assert!(b.comments(remediation)[0].body.contains("development: 2"));
}

#[test]
fn dry_run_and_report_only_never_mutate() {
    let b = backend();
    imbalanced_inventory(&b);

    let dry = audit(&b, BalanceMode::DryRun).expect("dry run");
    assert_eq!(dry.remediation, Remediation::WouldCreate);
    let report_only = audit(&b, BalanceMode::ReportOnly).expect("report only");
    assert_eq!(report_only.remediation, Remediation::Skipped);
    assert_eq!(report_only.exit_kind(), ExitKind::Detected);

    assert!(b.created().is_empty());
}

#[test]
fn inventory_failure_aborts_without_creating() {
    let b = backend();
    imbalanced_inventory(&b);
    b.fail_on(BackendOp::ListOpen, None);

    let err = audit(&b, BalanceMode::Apply).expect_err("listing fails");

    assert_eq!(err.exit_kind(), ExitKind::Upstream);
    assert!(b.created().is_empty());
}

#[test]
fn create_failure_is_upstream() {
    let b = backend();
    imbalanced_inventory(&b);
    b.fail_on(BackendOp::CreateItem, None);

    let err = audit(&b, BalanceMode::Apply).expect_err("create fails");
    assert_eq!(err.exit_kind(), ExitKind::Upstream);
    assert_eq!(b.list_open(None).expect("list").len(), 3);
}
