//! Blocker retry supervisor against the in-memory backend.

use chrono::{DateTime, TimeDelta, Utc};
use opsgate_core::backend::{BackendOp, IssueBackend, MemoryBackend};
use opsgate_core::clock::{FixedClock, parse_utc};
use opsgate_core::config::{SupervisorConfig, SupervisorRules};
use opsgate_core::model::{ActorIdentity, IdentityMatch, LabelChange};
use opsgate_core::supervisor::{Supervisor, SupervisorAction, SupervisorReport};
use opsgate_core::{ExitKind, OpsError};
use proptest::prelude::*;

const BOT: &str = "ops-bot";
const CI: &str = "ci-runner";

fn at(raw: &str) -> DateTime<Utc> {
    parse_utc(raw).expect("timestamp")
}

struct Fixture {
    backend: MemoryBackend,
    config: SupervisorConfig,
    rules: SupervisorRules,
    identity: ActorIdentity,
}

impl Fixture {
    fn new() -> Self {
        let config = SupervisorConfig::default();
        let rules = config.compile().expect("rules");
        Self {
            backend: MemoryBackend::new(BOT, at("2026-02-26T00:00:00Z")),
            config,
            rules,
            identity: ActorIdentity::new(BOT, IdentityMatch::Exact),
        }
    }

    fn blocked_item(&self, number: u64) {
        self.backend.insert_item(
            number,
            &format!("Integrate upstream feed {number}"),
            "Waiting on the partner endpoint.",
            &["status:blocked", "backlog"],
        );
    }

    fn failure(&self, number: u64, when: &str) {
        self.backend.push_comment(
            number,
            CI,
            at(when),
            "Smoke run failed: curl exit 28 (connection timed out)",
        );
    }

    fn try_run(&self, now: DateTime<Utc>, dry_run: bool) -> Result<SupervisorReport, OpsError> {
        self.backend.set_now(now);
        let clock = FixedClock(now);
        Supervisor {
            backend: &self.backend,
            clock: &clock,
            identity: &self.identity,
            config: &self.config,
            rules: &self.rules,
            dry_run,
        }
        .run()
    }

    fn run(&self, now: &str) -> SupervisorReport {
        self.try_run(at(now), false).expect("supervisor run")
    }
}

#[test]
fn within_grace_leaves_item_untouched() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    fx.failure(4, "2026-02-26T20:00:00Z");

    let report = fx.run("2026-02-26T21:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::WithinGrace);
    assert_eq!(report.items[0].failures, 1);
    assert!(fx.backend.label_updates().is_empty());
    assert_eq!(fx.backend.comments(4).len(), 1);
    assert_eq!(report.exit_kind(), ExitKind::Success);
}

#[test]
fn grace_elapsed_moves_item_back_to_todo() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    fx.failure(4, "2026-02-26T20:00:00Z");

    let report = fx.run("2026-02-26T23:05:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::Retried);
    let item = fx.backend.item(4).expect("item");
    assert!(!item.has_label("status:blocked"));
    assert!(item.has_label("status:todo"));
    assert!(item.has_label("backlog"));
    assert_eq!(fx.backend.label_updates(), [4]);

    let comments = fx.backend.comments(4);
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[1].author, BOT);
    assert!(comments[1].body.contains("retry 2/3"));
}

#[test]
fn grace_past_the_representable_range_never_elapses() {
    let mut fx = Fixture::new();
    fx.config.grace_hours = 4_000_000_000;
    fx.blocked_item(4);
    fx.failure(4, "2026-02-26T20:00:00Z");

    let report = fx.run("2026-02-27T20:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::WithinGrace);
    assert!(fx.backend.label_updates().is_empty());
    assert_eq!(fx.backend.comments(4).len(), 1);
}

#[test]
fn last_failure_is_the_latest_timestamp_not_the_last_position() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    fx.failure(4, "2026-02-26T20:00:00Z");
    fx.failure(4, "2026-02-26T12:00:00Z");

    let report = fx.run("2026-02-26T22:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::WithinGrace);
    assert_eq!(
        report.items[0].last_failure.as_deref(),
        Some("2026-02-26T20:00:00Z")
    );
}

#[test]
fn cap_reached_creates_one_escalation() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    fx.failure(4, "2026-02-26T10:00:00Z");
    fx.failure(4, "2026-02-26T14:00:00Z");
    fx.failure(4, "2026-02-26T20:00:00Z");

    let report = fx.run("2026-02-26T21:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::Escalated);
    let created = fx.backend.created();
    assert_eq!(created, [5]);
    assert_eq!(report.items[0].child_number, Some(5));

    let child = fx.backend.item(5).expect("child");
    assert_eq!(
        child.title,
        "Follow-up: External blocker for #4 after 3 failed attempts"
    );
    for label in ["backlog", "priority:P1", "status:todo"] {
        assert!(child.has_label(label), "{label}");
    }
    assert!(child.body.contains("2026-02-26T20:00:00Z"));

    let comments = fx.backend.comments(4);
    assert_eq!(comments.len(), 4);
    assert!(comments[3].body.contains("follow-up issue #5"));
    assert!(fx.backend.item(4).expect("parent").has_label("status:blocked"));
}

#[test]
fn already_escalated_is_a_no_op() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    fx.failure(4, "2026-02-26T10:00:00Z");
    fx.failure(4, "2026-02-26T14:00:00Z");
    fx.failure(4, "2026-02-26T20:00:00Z");
    fx.backend.push_comment(
        4,
        BOT,
        at("2026-02-26T20:30:00Z"),
        "Retry budget exhausted. Created follow-up issue #9: https://example/issues/9",
    );

    let report = fx.run("2026-02-26T23:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::AlreadyEscalated);
    assert!(fx.backend.created().is_empty());
    assert_eq!(fx.backend.comments(4).len(), 4);
}

#[test]
fn follow_up_marker_from_someone_else_does_not_count() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    for ts in ["2026-02-26T10:00:00Z", "2026-02-26T11:00:00Z", "2026-02-26T12:00:00Z"] {
        fx.failure(4, ts);
    }
    fx.backend.push_comment(
        4,
        "alice",
        at("2026-02-26T13:00:00Z"),
        "I'll open a follow-up issue #12",
    );

    let report = fx.run("2026-02-26T14:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::Escalated);
    assert_eq!(fx.backend.created().len(), 1);
}

#[test]
fn escalation_is_idempotent_across_runs() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    for ts in ["2026-02-26T10:00:00Z", "2026-02-26T11:00:00Z", "2026-02-26T12:00:00Z"] {
        fx.failure(4, ts);
    }

    fx.run("2026-02-26T13:00:00Z");
    let second = fx.run("2026-02-26T18:00:00Z");

    assert_eq!(second.items[0].action, SupervisorAction::AlreadyEscalated);
    assert_eq!(fx.backend.created().len(), 1);
    let references = fx
        .backend
        .comments(4)
        .iter()
        .filter(|c| c.body.contains("follow-up issue #"))
        .count();
    assert_eq!(references, 1);
}

#[test]
fn unknown_child_number_still_blocks_re_escalation() {
    let fx = Fixture::new();
    fx.backend.omit_created_numbers();
    fx.blocked_item(4);
    for ts in ["2026-02-26T10:00:00Z", "2026-02-26T11:00:00Z", "2026-02-26T12:00:00Z"] {
        fx.failure(4, ts);
    }

    let first = fx.run("2026-02-26T13:00:00Z");
    assert_eq!(first.items[0].child_number, None);
    assert!(fx.backend.comments(4)[3].body.contains("follow-up issue #?"));

    let second = fx.run("2026-02-26T14:00:00Z");
    assert_eq!(second.items[0].action, SupervisorAction::AlreadyEscalated);
    assert_eq!(fx.backend.created().len(), 1);
}

#[test]
fn own_failure_like_comments_are_ignored() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    for ts in ["2026-02-26T10:00:00Z", "2026-02-26T11:00:00Z", "2026-02-26T12:00:00Z"] {
        fx.backend
            .push_comment(4, BOT, at(ts), "upstream timeout while probing");
    }

    let report = fx.run("2026-02-26T20:00:00Z");

    assert_eq!(report.items[0].failures, 0);
    assert_eq!(report.items[0].action, SupervisorAction::None);
    assert!(fx.backend.created().is_empty());
}

#[test]
fn prefix_identity_suppresses_app_bot_comments() {
    let mut fx = Fixture::new();
    fx.identity = ActorIdentity::new(BOT, IdentityMatch::Prefix);
    fx.blocked_item(4);
    fx.backend.push_comment(
        4,
        "ops-bot[bot]",
        at("2026-02-26T10:00:00Z"),
        "connection refused",
    );

    let report = fx.run("2026-02-26T20:00:00Z");
    assert_eq!(report.items[0].failures, 0);
}

#[test]
fn item_errors_do_not_abort_the_batch() {
    let fx = Fixture::new();
    fx.blocked_item(1);
    fx.blocked_item(2);
    fx.failure(1, "2026-02-26T10:00:00Z");
    fx.failure(2, "2026-02-26T10:00:00Z");
    fx.backend.fail_on(BackendOp::Comments, Some(1));

    let report = fx.run("2026-02-26T20:00:00Z");

    assert_eq!(report.items[0].action, SupervisorAction::Errored);
    assert!(report.items[0].error.is_some());
    assert_eq!(report.items[1].action, SupervisorAction::Retried);
    assert_eq!(report.errored, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.exit_kind(), ExitKind::Upstream);
}

#[test]
fn listing_failure_is_upstream() {
    let fx = Fixture::new();
    fx.backend.fail_on(BackendOp::ListOpen, None);
    let err = fx
        .try_run(at("2026-02-26T20:00:00Z"), false)
        .expect_err("listing fails");
    assert_eq!(err.exit_kind(), ExitKind::Upstream);
}

#[test]
fn dry_run_decides_without_mutating() {
    let fx = Fixture::new();
    fx.blocked_item(1);
    fx.blocked_item(2);
    fx.failure(1, "2026-02-26T10:00:00Z");
    for ts in ["2026-02-26T10:00:00Z", "2026-02-26T11:00:00Z", "2026-02-26T12:00:00Z"] {
        fx.failure(2, ts);
    }

    let report = fx
        .try_run(at("2026-02-26T20:00:00Z"), true)
        .expect("dry run");

    assert_eq!(report.items[0].action, SupervisorAction::Retried);
    assert_eq!(report.items[1].action, SupervisorAction::Escalated);
    assert!(report.items.iter().all(|i| i.dry_run));
    assert!(fx.backend.created().is_empty());
    assert!(fx.backend.label_updates().is_empty());
    assert_eq!(fx.backend.comments(1).len(), 1);
}

#[test]
fn retries_never_exceed_budget_minus_one() {
    let fx = Fixture::new();
    fx.blocked_item(4);
    let start = at("2026-02-26T00:00:00Z");
    let reblock = LabelChange {
        add: vec!["status:blocked".into()],
        remove: vec!["status:todo".into()],
    };

    let mut retries = 0;
    let mut escalations = 0;
    for cycle in 0..6 {
        let failed_at = start + TimeDelta::hours(10 * cycle);
        fx.backend.push_comment(4, CI, failed_at, "service unavailable (503)");
        let report = fx
            .try_run(failed_at + TimeDelta::hours(5), false)
            .expect("run");
        match report.items.first().map(|i| i.action) {
            Some(SupervisorAction::Retried) => {
                retries += 1;
                fx.backend.set_labels(4, &reblock).expect("re-block");
            }
            Some(SupervisorAction::Escalated) => escalations += 1,
            _ => {}
        }
    }

    assert_eq!(retries, 2);
    assert_eq!(escalations, 1);
    assert_eq!(fx.backend.created().len(), 1);
}

proptest! {
    #[test]
    fn nothing_happens_inside_the_grace_window(offset_minutes in 0i64..180, failures in 1usize..3) {
        let fx = Fixture::new();
        fx.blocked_item(4);
        let last = at("2026-02-26T20:00:00Z");
        for i in 0..failures {
            let shift = TimeDelta::minutes(i64::try_from(i).unwrap_or(0) * 30);
            fx.backend.push_comment(4, CI, last - shift, "endpoint not reachable");
        }

        let report = fx
            .try_run(last + TimeDelta::minutes(offset_minutes), false)
            .expect("run");

        prop_assert_eq!(report.items[0].action, SupervisorAction::WithinGrace);
        prop_assert!(fx.backend.label_updates().is_empty());
        prop_assert_eq!(fx.backend.comments(4).len(), failures);
    }
}
