//! CloudTrail lookups through the `aws` CLI.
//!
//! Credentials and profile selection are left to the CLI's own resolution
//! chain; only the region is passed explicitly when configured.

use std::ffi::OsString;
use std::process::Command;
use std::time::Duration;

use opsgate_core::AdapterError;
use opsgate_core::audit_source::{
    AuditQuery, CloudAuditSource, LOOKUP_OPERATION, LookupOutcome, parse_lookup_page,
};
use opsgate_core::clock::format_utc;
use opsgate_core::config::AuditConfig;
use opsgate_core::process::run_with_timeout;
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_AWS_PROGRAM: &str = "aws";

pub struct AwsCliAuditSource {
    program: OsString,
    region: Option<String>,
    max_results: u32,
    max_pages: u32,
    timeout: Duration,
}

impl AwsCliAuditSource {
    pub fn new(program: impl Into<OsString>, config: &AuditConfig, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            region: config.region.clone(),
            max_results: config.max_results.max(1),
            max_pages: config.max_pages.max(1),
            timeout,
        }
    }

    fn args(&self, query: &AuditQuery, next_token: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "cloudtrail".to_string(),
            "lookup-events".to_string(),
            "--start-time".to_string(),
            format_utc(query.start),
            "--end-time".to_string(),
            format_utc(query.end),
            "--max-results".to_string(),
            self.max_results.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(principal) = &query.principal {
            args.push("--lookup-attributes".to_string());
            args.push(format!("AttributeKey=Username,AttributeValue={principal}"));
        }
        if let Some(token) = next_token {
            args.push("--next-token".to_string());
            args.push(token.to_string());
        }
        args
    }

    fn fetch_page(&self, args: &[String]) -> Result<Value, AdapterError> {
        let output = run_with_timeout(Command::new(&self.program).args(args), self.timeout)
            .map_err(|err| AdapterError::Command {
                operation: LOOKUP_OPERATION.to_string(),
                message: err.to_string(),
            })?;
        if output.timed_out {
            return Err(AdapterError::Timeout {
                operation: LOOKUP_OPERATION.to_string(),
                timeout_secs: self.timeout.as_secs(),
            });
        }
        if !output.success() {
            let stderr = output.stderr_lossy();
            let detail = stderr
                .lines()
                .map(str::trim)
                .rfind(|line| !line.is_empty())
                .unwrap_or("no stderr output");
            return Err(AdapterError::Command {
                operation: LOOKUP_OPERATION.to_string(),
                message: format!("exit status {}: {detail}", output.exit_code),
            });
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|err| AdapterError::decode(LOOKUP_OPERATION, err.to_string()))
    }
}

impl CloudAuditSource for AwsCliAuditSource {
    fn lookup(&self, query: &AuditQuery) -> Result<LookupOutcome, AdapterError> {
        let mut outcome = LookupOutcome::default();
        let mut next_token: Option<String> = None;
        for page in 1..=self.max_pages {
            let page_doc = self.fetch_page(&self.args(query, next_token.as_deref()))?;
            let (events, next) = parse_lookup_page(&page_doc)?;
            debug!(page, events = events.len(), "cloudtrail page fetched");
            outcome.events.extend(events);
            match next {
                Some(token) => next_token = Some(token),
                None => {
                    outcome.events.retain(|event| query.admits(event));
                    return Ok(outcome);
                }
            }
        }
        warn!(
            max_pages = self.max_pages,
            "cloudtrail page cap reached; older events in the window were not read"
        );
        outcome.events.retain(|event| query.admits(event));
        Ok(outcome)
    }
}
