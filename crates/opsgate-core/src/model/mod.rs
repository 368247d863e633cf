//! Snapshot types read from adapters and the decision documents written by
//! the use cases. Every value lives for one batch invocation.

pub mod audit;
pub mod decision;
pub mod identity;
pub mod work_item;

pub use audit::{AuditEvent, Fingerprint, MISSING};
pub use decision::{
    Decision, DecisionReason, GATE_SCHEMA_VERSION, GateArtifact, RollbackHints, SmokeSummary,
};
pub use identity::{ActorIdentity, IdentityMatch};
pub use work_item::{
    Comment, CreatedItem, ItemState, LabelChange, NewItem, WorkItem, extract_issue_number,
};
