//! Environment and configuration resolution for CLI commands.
//!
//! Precedence for every setting: CLI flag > environment variable > config
//! file > built-in default. Environment access goes through [`EnvReader`] so
//! tests never touch the process environment.

use std::env;
use std::path::{Path, PathBuf};

use opsgate_core::OpsError;
use opsgate_core::config::{self, OpsConfig};
use tracing::debug;

/// Environment reader trait for dependency injection in tests.
pub trait EnvReader {
    /// Value of `key`, with empty values treated as unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Real process environment.
pub struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Load the config file (flag > `OPSGATE_CONFIG` > discovered), apply
/// environment overrides, and validate the result.
pub fn load_config(
    flag: Option<&Path>,
    env: &dyn EnvReader,
) -> Result<(OpsConfig, Option<PathBuf>), OpsError> {
    let env_path = env.get("OPSGATE_CONFIG").map(PathBuf::from);
    let cwd = env::current_dir().map_err(|err| OpsError::Fatal(format!("cannot read cwd: {err}")))?;
    let (mut cfg, source) = config::load_config(flag, env_path.as_deref(), &cwd)?;
    cfg.apply_env(|key| env.get(key));
    cfg.validate()?;
    match &source {
        Some(path) => debug!(path = %path.display(), "config loaded"),
        None => debug!("no config file found; using defaults"),
    }
    Ok((cfg, source))
}

/// `owner/name` repository slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn parse(raw: &str) -> Result<Self, OpsError> {
        let trimmed = raw.trim();
        let invalid = || {
            OpsError::precondition(
                "GH_REPO",
                format!("invalid repo slug '{trimmed}': expected <owner>/<repo>"),
            )
        };
        let (owner, repo) = trimmed.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Repository from `--repo` or `GH_REPO`.
pub fn require_repo(flag: Option<&str>, env: &dyn EnvReader) -> Result<RepoSlug, OpsError> {
    let raw = flag
        .filter(|v| !v.trim().is_empty())
        .map(ToString::to_string)
        .or_else(|| env.get("GH_REPO"))
        .ok_or_else(|| OpsError::precondition("GH_REPO", "repository not set (use --repo or GH_REPO)"))?;
    RepoSlug::parse(&raw)
}

/// Bearer token for the issue backend.
///
/// `GH_TOKEN_ENV` names a file holding the token when such a file exists,
/// otherwise it is the token itself. Falls back to `GITHUB_TOKEN`, then
/// `GH_TOKEN`.
pub fn resolve_token(env: &dyn EnvReader) -> Result<Option<String>, OpsError> {
    if let Some(value) = env.get("GH_TOKEN_ENV") {
        let path = Path::new(&value);
        if path.is_file() {
            let token = std::fs::read_to_string(path).map_err(|err| {
                OpsError::precondition("GH_TOKEN_ENV", format!("cannot read {value}: {err}"))
            })?;
            let token = token.trim().to_string();
            if token.is_empty() {
                return Err(OpsError::precondition("GH_TOKEN_ENV", format!("{value} is empty")));
            }
            return Ok(Some(token));
        }
        return Ok(Some(value.trim().to_string()));
    }
    Ok(env.get("GITHUB_TOKEN").or_else(|| env.get("GH_TOKEN")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Test environment reader with configurable values.
    #[derive(Default)]
    pub struct MockEnv {
        vars: HashMap<String, String>,
    }

    impl MockEnv {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn var(mut self, key: &str, val: &str) -> Self {
            self.vars.insert(key.to_string(), val.to_string());
            self
        }
    }

    impl EnvReader for MockEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).filter(|v| !v.trim().is_empty()).cloned()
        }
    }

    #[test]
    fn repo_slug_accepts_owner_and_name() {
        let slug = RepoSlug::parse("acme/geo-ranking").expect("slug");
        assert_eq!(slug.owner, "acme");
        assert_eq!(slug.full_name(), "acme/geo-ranking");
    }

    #[test]
    fn repo_slug_rejects_malformed_input() {
        for raw in ["acme", "/repo", "acme/", "a/b/c", ""] {
            let err = RepoSlug::parse(raw).expect_err(raw);
            assert!(err.to_string().starts_with("GH_REPO"), "{raw}");
        }
    }

    #[test]
    fn repo_flag_beats_env() {
        let env = MockEnv::new().var("GH_REPO", "env/repo");
        let slug = require_repo(Some("flag/repo"), &env).expect("slug");
        assert_eq!(slug.full_name(), "flag/repo");
        let slug = require_repo(None, &env).expect("slug");
        assert_eq!(slug.full_name(), "env/repo");
    }

    #[test]
    fn missing_repo_is_precondition() {
        let err = require_repo(None, &MockEnv::new()).expect_err("missing");
        assert_eq!(err.exit_kind().code(), 2);
    }

    #[test]
    fn token_from_file_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token");
        std::fs::write(&path, "ghp_secret\n").expect("write");
        let env = MockEnv::new()
            .var("GH_TOKEN_ENV", &path.display().to_string())
            .var("GITHUB_TOKEN", "other");
        assert_eq!(resolve_token(&env).expect("token").as_deref(), Some("ghp_secret"));
    }

    #[test]
    fn token_value_and_fallbacks() {
        let env = MockEnv::new().var("GH_TOKEN_ENV", "ghp_inline");
        assert_eq!(resolve_token(&env).expect("token").as_deref(), Some("ghp_inline"));

        let env = MockEnv::new().var("GH_TOKEN", "gh_cli");
        assert_eq!(resolve_token(&env).expect("token").as_deref(), Some("gh_cli"));

        assert_eq!(resolve_token(&MockEnv::new()).expect("none"), None);
    }

    #[test]
    fn empty_token_file_is_precondition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token");
        std::fs::write(&path, "  \n").expect("write");
        let env = MockEnv::new().var("GH_TOKEN_ENV", &path.display().to_string());
        assert!(resolve_token(&env).is_err());
    }
}
