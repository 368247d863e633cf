//! GitHub REST implementation of [`IssueBackend`].

use std::collections::BTreeSet;
use std::time::Duration;

use opsgate_core::AdapterError;
use opsgate_core::backend::IssueBackend;
use opsgate_core::clock::parse_utc;
use opsgate_core::config::BackendConfig;
use opsgate_core::model::{Comment, CreatedItem, ItemState, LabelChange, NewItem, WorkItem};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::settings::RepoSlug;

const USER_AGENT: &str = concat!("opsgate/", env!("CARGO_PKG_VERSION"));
const GHOST_LOGIN: &str = "ghost";

#[derive(Debug, Clone, Deserialize)]
struct GitHubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    created_at: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubComment {
    #[serde(default)]
    body: Option<String>,
    created_at: String,
    #[serde(default)]
    user: Option<GitHubUser>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubCreated {
    #[serde(default)]
    html_url: String,
}

impl GitHubIssue {
    fn into_work_item(self, operation: &str) -> Result<WorkItem, AdapterError> {
        let created_at = parse_utc(&self.created_at).ok_or_else(|| {
            AdapterError::decode(
                operation,
                format!("issue #{} has invalid created_at {:?}", self.number, self.created_at),
            )
        })?;
        let state = if self.state.eq_ignore_ascii_case("closed") {
            ItemState::Closed
        } else {
            ItemState::Open
        };
        Ok(WorkItem {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: self.labels.into_iter().map(|label| label.name).collect(),
            state,
            url: self.html_url,
            created_at,
        })
    }
}

impl GitHubComment {
    fn into_comment(self, operation: &str) -> Result<Comment, AdapterError> {
        let created_at = parse_utc(&self.created_at).ok_or_else(|| {
            AdapterError::decode(
                operation,
                format!("comment has invalid created_at {:?}", self.created_at),
            )
        })?;
        Ok(Comment {
            author: self
                .user
                .map_or_else(|| GHOST_LOGIN.to_string(), |user| user.login),
            created_at,
            body: self.body.unwrap_or_default(),
        })
    }
}

/// Blocking GitHub Issues client.
pub struct GitHubClient {
    agent: ureq::Agent,
    api_url: String,
    repo: RepoSlug,
    token: Option<String>,
    timeout_secs: u64,
    page_size: u32,
    max_pages: u32,
}

impl GitHubClient {
    pub fn new(config: &BackendConfig, repo: RepoSlug, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            repo,
            token,
            timeout_secs: config.http_timeout_secs,
            page_size: config.page_size.clamp(1, 100),
            max_pages: config.max_pages.max(1),
        }
    }

    fn issues_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/issues{suffix}",
            self.api_url, self.repo.owner, self.repo.repo
        )
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let request = self
            .agent
            .request(method, url)
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: ureq::Request,
        body: Option<&Value>,
    ) -> Result<T, AdapterError> {
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let response = result.map_err(|err| self.map_error(operation, err))?;
        response
            .into_json::<T>()
            .map_err(|err| AdapterError::decode(operation, err.to_string()))
    }

    fn map_error(&self, operation: &str, err: ureq::Error) -> AdapterError {
        match err {
            ureq::Error::Status(status, response) => {
                let message = response
                    .into_string()
                    .ok()
                    .and_then(|text| {
                        serde_json::from_str::<Value>(&text)
                            .ok()
                            .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                            .or(Some(text))
                    })
                    .unwrap_or_default();
                AdapterError::Status {
                    operation: operation.to_string(),
                    status,
                    message,
                }
            }
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                if message.contains("timed out") {
                    AdapterError::Timeout {
                        operation: operation.to_string(),
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    AdapterError::transport(operation, message)
                }
            }
        }
    }

    /// Fetch pages until a short page or the page cap.
    fn paginate<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, AdapterError> {
        let mut out = Vec::new();
        let per_page = self.page_size.to_string();
        for page in 1..=self.max_pages {
            let page_str = page.to_string();
            let mut request = self.request("GET", url);
            for (key, value) in query {
                request = request.query(key, value);
            }
            request = request
                .query("per_page", &per_page)
                .query("page", &page_str);
            let batch: Vec<T> = self.send(operation, request, None)?;
            let raw_len = batch.len();
            out.extend(batch);
            if raw_len < self.page_size as usize {
                return Ok(out);
            }
        }
        warn!(
            operation,
            max_pages = self.max_pages,
            "page cap reached; results may be incomplete"
        );
        Ok(out)
    }
}

impl IssueBackend for GitHubClient {
    fn list_open(&self, label: Option<&str>) -> Result<Vec<WorkItem>, AdapterError> {
        const OP: &str = "issues:list";
        let mut query = vec![("state", "open"), ("sort", "created"), ("direction", "asc")];
        if let Some(label) = label {
            query.push(("labels", label));
        }
        let issues: Vec<GitHubIssue> = self.paginate(OP, &self.issues_url(""), &query)?;
        let items = issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| issue.into_work_item(OP))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(repo = %self.repo.full_name(), count = items.len(), ?label, "listed open items");
        Ok(items)
    }

    fn get_comments(&self, number: u64) -> Result<Vec<Comment>, AdapterError> {
        const OP: &str = "issues:comments";
        let comments: Vec<GitHubComment> =
            self.paginate(OP, &self.issues_url(&format!("/{number}/comments")), &[])?;
        comments
            .into_iter()
            .map(|comment| comment.into_comment(OP))
            .collect()
    }

    fn get_labels(&self, number: u64) -> Result<BTreeSet<String>, AdapterError> {
        const OP: &str = "issues:labels";
        let request = self.request("GET", &self.issues_url(&format!("/{number}")));
        let issue: GitHubIssue = self.send(OP, request, None)?;
        Ok(issue.labels.into_iter().map(|label| label.name).collect())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<(), AdapterError> {
        let request = self.request("POST", &self.issues_url(&format!("/{number}/comments")));
        let _: IgnoredAny = self.send("issues:comment", request, Some(&json!({ "body": body })))?;
        Ok(())
    }

    fn set_labels(&self, number: u64, change: &LabelChange) -> Result<(), AdapterError> {
        if change.is_empty() {
            return Ok(());
        }
        let current = self.get_labels(number)?;
        let next = change.apply(&current);
        if next == current {
            debug!(item = number, "labels already in target state");
            return Ok(());
        }
        let labels: Vec<&String> = next.iter().collect();
        let request = self.request("PATCH", &self.issues_url(&format!("/{number}")));
        let _: IgnoredAny = self.send(
            "issues:set-labels",
            request,
            Some(&json!({ "labels": labels })),
        )?;
        Ok(())
    }

    fn create_item(&self, item: &NewItem) -> Result<CreatedItem, AdapterError> {
        let request = self.request("POST", &self.issues_url(""));
        let body = json!({
            "title": item.title,
            "body": item.body,
            "labels": item.labels,
        });
        let created: GitHubCreated = self.send("issues:create", request, Some(&body))?;
        let created = CreatedItem::from_url(created.html_url);
        if created.number.is_none() {
            warn!(url = %created.url, "created item URL has no issue number");
        }
        Ok(created)
    }

    fn close_item(&self, number: u64) -> Result<(), AdapterError> {
        let request = self.request("PATCH", &self.issues_url(&format!("/{number}")));
        let _: IgnoredAny = self.send(
            "issues:close",
            request,
            Some(&json!({ "state": "closed" })),
        )?;
        Ok(())
    }
}
