//! opsgate-core: data model, adapter traits, and the four batch use cases
//! (blocker retry supervisor, workstream balance auditor, staging-lite
//! promote gate, legacy-credential audit).
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums; [`error::OpsError::exit_kind`]
//!   maps every failure onto the shared exit-code contract.
//! - **Logging**: `tracing` macros only; the binary installs the subscriber.
//! - **Time**: use cases read time through [`clock::Clock`].

pub mod artifact;
pub mod audit_source;
pub mod backend;
pub mod balance;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod legacy_audit;
pub mod model;
pub mod process;
pub mod smoke;
pub mod supervisor;

pub use error::{AdapterError, ExitKind, OpsError};
