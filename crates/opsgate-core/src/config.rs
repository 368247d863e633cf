//! Configuration file, defaults, and environment overrides.
//!
//! Lookup order for the file: explicit path, `OPSGATE_CONFIG`,
//! `./opsgate.toml`, then `<user config dir>/opsgate/config.toml`. A missing
//! file means defaults.

use std::io;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::balance::Workstream;
use crate::model::IdentityMatch;

pub const CONFIG_FILE_NAME: &str = "opsgate.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{key}: invalid regex {pattern:?}: {message}")]
    Regex {
        key: String,
        pattern: String,
        message: String,
    },

    #[error("{key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_backend_max_pages")]
    pub max_pages: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            http_timeout_secs: default_http_timeout_secs(),
            page_size: default_page_size(),
            max_pages: default_backend_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_grace_hours")]
    pub grace_hours: u32,
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
    #[serde(default = "default_failure_patterns")]
    pub failure_patterns: Vec<String>,
    #[serde(default = "default_followup_pattern")]
    pub followup_pattern: String,
    #[serde(default)]
    pub identity_match: IdentityMatch,
    #[serde(default = "default_blocked_label")]
    pub blocked_label: String,
    #[serde(default = "default_todo_label")]
    pub todo_label: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_hours: default_grace_hours(),
            max_fails: default_max_fails(),
            failure_patterns: default_failure_patterns(),
            followup_pattern: default_followup_pattern(),
            identity_match: IdentityMatch::default(),
            blocked_label: default_blocked_label(),
            todo_label: default_todo_label(),
        }
    }
}

/// Compiled matchers for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorRules {
    pub failure: Vec<Regex>,
    pub followup: Regex,
}

impl SupervisorRules {
    #[must_use]
    pub fn is_failure(&self, body: &str) -> bool {
        self.failure.iter().any(|re| re.is_match(body))
    }

    #[must_use]
    pub fn is_followup_marker(&self, body: &str) -> bool {
        self.followup.is_match(body)
    }
}

impl SupervisorConfig {
    /// Validate ranges and compile the case-insensitive matchers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending key.
    pub fn compile(&self) -> Result<SupervisorRules, ConfigError> {
        if self.max_fails == 0 {
            return Err(ConfigError::invalid(
                "supervisor.max_fails",
                "must be at least 1",
            ));
        }
        if self.failure_patterns.is_empty() {
            return Err(ConfigError::invalid(
                "supervisor.failure_patterns",
                "at least one pattern is required",
            ));
        }
        let failure = self
            .failure_patterns
            .iter()
            .map(|pattern| compile_ci("supervisor.failure_patterns", pattern))
            .collect::<Result<Vec<_>, _>>()?;
        let followup = compile_ci("supervisor.followup_pattern", &self.followup_pattern)?;
        Ok(SupervisorRules { failure, followup })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstreamRule {
    pub name: Workstream,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    #[serde(default = "default_imbalance_gap")]
    pub imbalance_gap: u32,
    #[serde(default = "default_excluded_labels")]
    pub excluded_labels: Vec<String>,
    #[serde(default = "default_remediation_title")]
    pub remediation_title: String,
    #[serde(default = "default_true")]
    pub auto_close: bool,
    /// Ordered: the first rule whose keywords match an item wins.
    #[serde(default = "default_workstreams")]
    pub workstreams: Vec<WorkstreamRule>,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            imbalance_gap: default_imbalance_gap(),
            excluded_labels: default_excluded_labels(),
            remediation_title: default_remediation_title(),
            auto_close: default_true(),
            workstreams: default_workstreams(),
        }
    }
}

impl BalanceConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a workstream is missing, duplicated, or
    /// has no keywords, or when the remediation title is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remediation_title.trim().is_empty() {
            return Err(ConfigError::invalid(
                "balance.remediation_title",
                "must not be empty",
            ));
        }
        for stream in Workstream::ALL {
            let count = self.workstreams.iter().filter(|r| r.name == stream).count();
            if count != 1 {
                return Err(ConfigError::invalid(
                    "balance.workstreams",
                    format!("workstream {stream} must appear exactly once (found {count})"),
                ));
            }
        }
        if let Some(rule) = self.workstreams.iter().find(|r| r.keywords.is_empty()) {
            return Err(ConfigError::invalid(
                "balance.workstreams",
                format!("workstream {} has no keywords", rule.name),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_smoke_timeout_secs")]
    pub smoke_timeout_secs: u64,
    #[serde(default = "default_runbook")]
    pub runbook: String,
    #[serde(default = "default_rollback_steps")]
    pub rollback_steps: Vec<String>,
    #[serde(default = "default_gate_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            smoke_timeout_secs: default_smoke_timeout_secs(),
            runbook: default_runbook(),
            rollback_steps: default_rollback_steps(),
            artifact_dir: default_gate_artifact_dir(),
        }
    }
}

impl GateConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero timeout or fewer than two rollback
    /// steps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smoke_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "gate.smoke_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.rollback_steps.len() < 2 {
            return Err(ConfigError::invalid(
                "gate.rollback_steps",
                "at least two rollback steps are required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    #[serde(default)]
    pub include_lookup_events: bool,
    #[serde(default)]
    pub legacy_user: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_audit_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_top_limit")]
    pub top_limit: usize,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            include_lookup_events: false,
            legacy_user: None,
            region: None,
            max_results: default_max_results(),
            max_pages: default_audit_max_pages(),
            top_limit: default_top_limit(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl OpsConfig {
    /// Check every section once at startup, compiling the supervisor regexes.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.supervisor.compile()?;
        self.balance.validate()?;
        self.gate.validate()
    }

    /// Apply environment overrides. `lookup` returns a non-empty value for
    /// a key, or `None`.
    ///
    /// `LOOKBACK_HOURS` is not handled here: its validation has its own exit
    /// code in the legacy audit.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("GITHUB_API_URL") {
            self.backend.api_url = url;
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.audit.region = Some(region);
        }
        if let Some(user) = lookup("LEGACY_USER") {
            self.audit.legacy_user = Some(user);
        }
        if let Some(flag) = lookup("INCLUDE_LOOKUP_EVENTS") {
            self.audit.include_lookup_events = is_truthy(&flag);
        }
    }
}

/// Truthy flag values: `1`, `true`, `yes`, `on` (case-insensitive).
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Candidate config paths in lookup order.
#[must_use]
pub fn candidate_paths(
    explicit: Option<&Path>,
    env_path: Option<&Path>,
    cwd: &Path,
) -> Vec<PathBuf> {
    if let Some(path) = explicit.or(env_path) {
        return vec![path.to_path_buf()];
    }
    let mut paths = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("opsgate").join("config.toml"));
    }
    paths
}

/// Load configuration from the first existing candidate path.
///
/// An explicitly named file must exist; discovered locations are optional.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] for unreadable or
/// malformed files.
pub fn load_config(
    explicit: Option<&Path>,
    env_path: Option<&Path>,
    cwd: &Path,
) -> Result<(OpsConfig, Option<PathBuf>), ConfigError> {
    let required = explicit.is_some() || env_path.is_some();
    for path in candidate_paths(explicit, env_path, cwd) {
        if !required && !path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = parse_config(&content).map_err(|message| ConfigError::Parse {
            path: path.clone(),
            message,
        })?;
        return Ok((config, Some(path)));
    }
    Ok((OpsConfig::default(), None))
}

/// Parse TOML text into a config.
///
/// # Errors
///
/// Returns the TOML diagnostic as a string.
pub fn parse_config(content: &str) -> Result<OpsConfig, String> {
    toml::from_str::<OpsConfig>(content).map_err(|err| err.to_string())
}

fn compile_ci(key: &str, pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| ConfigError::Regex {
            key: key.to_string(),
            pattern: pattern.to_string(),
            message: err.to_string(),
        })
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    100
}

fn default_backend_max_pages() -> u32 {
    10
}

fn default_grace_hours() -> u32 {
    3
}

fn default_max_fails() -> u32 {
    3
}

fn default_failure_patterns() -> Vec<String> {
    [
        r"curl\s+exit\s+28",
        r"timeout",
        r"timed out",
        r"unreachable",
        r"connection refused",
        r"connection reset",
        r"service unavailable",
        r"endpoint .*not reachable",
        r"no reachable .*endpoint",
        r"endpoint .*nicht erreichbar",
        r"kein erreichbarer .*endpoint",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_followup_pattern() -> String {
    r"follow-up issue\s*#(\d+|\?)".to_string()
}

fn default_blocked_label() -> String {
    "status:blocked".to_string()
}

fn default_todo_label() -> String {
    "status:todo".to_string()
}

fn default_imbalance_gap() -> u32 {
    1
}

fn default_excluded_labels() -> Vec<String> {
    vec!["status:blocked".to_string(), "crawler:auto".to_string()]
}

fn default_remediation_title() -> String {
    "[P0] Restore workstream balance across development, documentation and testing".to_string()
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| (*w).to_string()).collect()
}

fn default_workstreams() -> Vec<WorkstreamRule> {
    vec![
        WorkstreamRule {
            name: Workstream::Development,
            keywords: words(&[
                "develop",
                "development",
                "implement",
                "implementation",
                "feature",
                "api",
                "service",
                "pipeline",
                "integration",
                "gui",
                "build",
                "refactor",
            ]),
        },
        WorkstreamRule {
            name: Workstream::Documentation,
            keywords: words(&[
                "doc",
                "docs",
                "documentation",
                "readme",
                "runbook",
                "guide",
                "architecture",
                "operations",
            ]),
        },
        WorkstreamRule {
            name: Workstream::Testing,
            keywords: words(&[
                "test",
                "tests",
                "testing",
                "pytest",
                "e2e",
                "smoke",
                "stability",
                "regression",
                "qa",
                "validation",
            ]),
        },
    ]
}

fn default_smoke_timeout_secs() -> u64 {
    300
}

fn default_runbook() -> String {
    "docs/DEPLOY_ROLLBACK_RUNBOOK.md".to_string()
}

fn default_rollback_steps() -> Vec<String> {
    words(&[
        "Abort the promotion; take no further deployment action.",
        "If a partial rollout happened, revert the task definition to the last known-good revision per the runbook.",
        "Re-run the smoke checks (API /health, UI /healthz) against the previous digest.",
    ])
}

fn default_gate_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts/staging-lite")
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_max_results() -> u32 {
    50
}

fn default_audit_max_pages() -> u32 {
    20
}

fn default_top_limit() -> usize {
    10
}

fn default_recent_limit() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = OpsConfig::default();
        assert_eq!(config.supervisor.grace_hours, 3);
        assert_eq!(config.supervisor.max_fails, 3);
        assert_eq!(config.balance.imbalance_gap, 1);
        assert_eq!(config.gate.smoke_timeout_secs, 300);
        assert_eq!(config.audit.lookback_hours, 24);
        assert!(!config.audit.include_lookup_events);
        config.validate().expect("default config valid");
    }

    #[test]
    fn failure_patterns_are_case_insensitive() {
        let rules = SupervisorConfig::default().compile().expect("rules");
        assert!(rules.is_failure("curl: Connection Refused by upstream"));
        assert!(rules.is_failure("Request TIMED OUT after 30s"));
        assert!(rules.is_failure("curl exit 28"));
        assert!(!rules.is_failure("all green"));
    }

    #[test]
    fn followup_marker_matches_number_or_placeholder() {
        let rules = SupervisorConfig::default().compile().expect("rules");
        assert!(rules.is_followup_marker("Created Follow-up issue #57."));
        assert!(rules.is_followup_marker("created follow-up issue #? (url)"));
        assert!(!rules.is_followup_marker("follow-up pending"));
    }

    #[test]
    fn invalid_regex_names_key() {
        let config = SupervisorConfig {
            failure_patterns: vec!["(unclosed".to_string()],
            ..SupervisorConfig::default()
        };
        let err = config.compile().expect_err("bad regex");
        assert!(err.to_string().starts_with("supervisor.failure_patterns"));
    }

    #[test]
    fn zero_max_fails_rejected() {
        let config = SupervisorConfig {
            max_fails: 0,
            ..SupervisorConfig::default()
        };
        assert!(config.compile().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
[supervisor]
grace_hours = 6

[audit]
include_lookup_events = true
"#,
        )
        .expect("parse");
        assert_eq!(config.supervisor.grace_hours, 6);
        assert_eq!(config.supervisor.max_fails, 3);
        assert!(config.audit.include_lookup_events);
        assert_eq!(config.balance.workstreams.len(), 3);
    }

    #[test]
    fn workstream_order_comes_from_file() {
        let config = parse_config(
            r#"
[[balance.workstreams]]
name = "testing"
keywords = ["test"]

[[balance.workstreams]]
name = "development"
keywords = ["api"]

[[balance.workstreams]]
name = "documentation"
keywords = ["docs"]
"#,
        )
        .expect("parse");
        assert_eq!(config.balance.workstreams[0].name, Workstream::Testing);
        config.balance.validate().expect("valid");
    }

    #[test]
    fn missing_workstream_rejected() {
        let config = parse_config(
            r#"
[[balance.workstreams]]
name = "testing"
keywords = ["test"]
"#,
        )
        .expect("parse");
        let err = config.balance.validate().expect_err("missing streams");
        assert!(err.to_string().contains("development"));
    }

    #[test]
    fn gate_requires_two_rollback_steps() {
        let config = GateConfig {
            rollback_steps: vec!["only one".into()],
            ..GateConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("GITHUB_API_URL", "http://localhost:9999"),
            ("AWS_REGION", "eu-central-1"),
            ("INCLUDE_LOOKUP_EVENTS", "Yes"),
            ("LEGACY_USER", "legacy-deploy"),
        ]
        .into_iter()
        .collect();
        let mut config = OpsConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.backend.api_url, "http://localhost:9999");
        assert_eq!(config.audit.region.as_deref(), Some("eu-central-1"));
        assert_eq!(config.audit.legacy_user.as_deref(), Some("legacy-deploy"));
        assert!(config.audit.include_lookup_events);
    }

    #[test]
    fn truthy_values() {
        for value in ["1", "true", "YES", " on "] {
            assert!(is_truthy(value), "{value}");
        }
        for value in ["0", "false", "", "nope"] {
            assert!(!is_truthy(value), "{value}");
        }
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = load_config(Some(&missing), None, dir.path()).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn discovered_file_in_cwd_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[gate]\nsmoke_timeout_secs = 42\n",
        )
        .expect("write");
        let (config, path) = load_config(None, None, dir.path()).expect("load");
        assert_eq!(config.gate.smoke_timeout_secs, 42);
        assert_eq!(path, Some(dir.path().join(CONFIG_FILE_NAME)));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[gate\n").expect("write");
        let err = load_config(Some(&path), None, dir.path()).expect_err("parse");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
