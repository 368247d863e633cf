use std::fmt;
use std::io;
use std::path::PathBuf;

/// Process exit classes shared by every opsgate component.
///
/// CI gates consume these numbers directly, so the mapping is part of the
/// public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExitKind {
    Success,
    Fatal,
    Precondition,
    Detected,
    ActionFailed,
    Upstream,
}

impl ExitKind {
    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Fatal => 1,
            Self::Precondition => 2,
            Self::Detected => 10,
            Self::ActionFailed => 20,
            Self::Upstream => 30,
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "ok",
            Self::Fatal => "fatal error",
            Self::Precondition => "precondition failed",
            Self::Detected => "condition detected",
            Self::ActionFailed => "action failed",
            Self::Upstream => "upstream failure",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.message())
    }
}

/// Failure of a single backend call (issue tracker, cloud audit log, or
/// wrapped CLI).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("{operation}: timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("{operation}: transport failure: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation}: upstream returned status {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation}: malformed response: {message}")]
    Decode { operation: String, message: String },

    #[error("{operation}: command failed: {message}")]
    Command { operation: String, message: String },
}

impl AdapterError {
    /// Name of the backend operation that failed.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Timeout { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Status { operation, .. }
            | Self::Decode { operation, .. }
            | Self::Command { operation, .. } => operation,
        }
    }

    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn decode(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while writing run artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact directory {path} could not be created: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("artifact {path} already exists; run ids are write-once")]
    AlreadyExists { path: PathBuf },

    #[error("failed to write artifact {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Umbrella error for the batch use cases.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// Bad or missing argument, environment variable, or configuration value.
    #[error("{variable}: {message}")]
    Precondition { variable: String, message: String },

    /// The requested audit window is unusable.
    #[error("{variable}: {message}")]
    InvalidWindow { variable: String, message: String },

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Invariant violation; the run cannot produce a trustworthy result.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl OpsError {
    pub fn precondition(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Precondition {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// Exit class for this error when it escapes a component.
    #[must_use]
    pub const fn exit_kind(&self) -> ExitKind {
        match self {
            Self::Precondition { .. } | Self::Config(_) => ExitKind::Precondition,
            Self::InvalidWindow { .. } => ExitKind::ActionFailed,
            Self::Adapter(_) => ExitKind::Upstream,
            Self::Artifact(ArtifactError::CreateDir { .. } | ArtifactError::AlreadyExists { .. }) => {
                ExitKind::Precondition
            }
            Self::Artifact(_) | Self::Fatal(_) => ExitKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exit_codes_are_unique() {
        let all = [
            ExitKind::Success,
            ExitKind::Fatal,
            ExitKind::Precondition,
            ExitKind::Detected,
            ExitKind::ActionFailed,
            ExitKind::Upstream,
        ];
        let mut seen = HashSet::new();
        for kind in all {
            assert!(seen.insert(kind.code()), "duplicate code {}", kind.code());
        }
    }

    #[test]
    fn contract_codes_are_stable() {
        assert_eq!(ExitKind::Success.code(), 0);
        assert_eq!(ExitKind::Precondition.code(), 2);
        assert_eq!(ExitKind::Detected.code(), 10);
        assert_eq!(ExitKind::ActionFailed.code(), 20);
        assert_eq!(ExitKind::Upstream.code(), 30);
    }

    #[test]
    fn adapter_error_names_operation() {
        let err = AdapterError::transport("issues:list", "connection reset");
        assert_eq!(err.operation(), "issues:list");
        assert_eq!(
            err.to_string(),
            "issues:list: transport failure: connection reset"
        );
    }

    #[test]
    fn ops_error_maps_to_exit_kind() {
        let pre = OpsError::precondition("GH_REPO", "must be owner/name");
        assert_eq!(pre.exit_kind(), ExitKind::Precondition);
        assert_eq!(pre.to_string(), "GH_REPO: must be owner/name");

        let adapter: OpsError = AdapterError::decode("issues:list", "bad json").into();
        assert_eq!(adapter.exit_kind(), ExitKind::Upstream);

        let exists = OpsError::Artifact(ArtifactError::AlreadyExists {
            path: PathBuf::from("a/run.json"),
        });
        assert_eq!(exists.exit_kind(), ExitKind::Precondition);

        assert_eq!(OpsError::Fatal("x".into()).exit_kind(), ExitKind::Fatal);

        let window = OpsError::InvalidWindow {
            variable: "LOOKBACK_HOURS".into(),
            message: "must be positive".into(),
        };
        assert_eq!(window.exit_kind(), ExitKind::ActionFailed);
    }
}
