//! Bot identity resolution for the supervisor.
//!
//! The resolution chain: `--bot-identity` flag > `BOT_IDENTITY` env. There
//! is no fallback: without an identity the supervisor cannot tell its own
//! comments from real failure reports.

use opsgate_core::OpsError;
use opsgate_core::model::{ActorIdentity, IdentityMatch};

use crate::settings::EnvReader;

pub const IDENTITY_VARIABLE: &str = "BOT_IDENTITY";

fn resolve_identity_with(cli_flag: Option<&str>, env: &dyn EnvReader) -> Option<String> {
    if let Some(login) = cli_flag.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(login.to_string());
    }
    env.get(IDENTITY_VARIABLE).map(|v| v.trim().to_string())
}

/// Resolve the actor identity or fail with a precondition naming
/// `BOT_IDENTITY`.
pub fn require_identity(
    cli_flag: Option<&str>,
    match_mode: IdentityMatch,
    env: &dyn EnvReader,
) -> Result<ActorIdentity, OpsError> {
    resolve_identity_with(cli_flag, env)
        .map(|login| ActorIdentity::new(login, match_mode))
        .ok_or_else(|| {
            OpsError::precondition(
                IDENTITY_VARIABLE,
                "bot identity required; set --bot-identity or BOT_IDENTITY",
            )
        })
}
