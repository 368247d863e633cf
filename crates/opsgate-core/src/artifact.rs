//! Run-scoped decision documents plus a `latest` alias.
//!
//! Layout under the artifact directory:
//!
//! - `<run_id>.json` (and optional `<run_id>.md`): written once, never
//!   overwritten.
//! - `latest.json` (and `latest.md`): replaced by write-then-rename on every
//!   run, so readers always see a complete document.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ArtifactError, OpsError};

pub const LATEST_STEM: &str = "latest";

/// Validated run identifier: `[A-Za-z0-9._-]+`, not `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(String);

impl RunId {
    /// # Errors
    ///
    /// Returns a precondition error naming `--run-id` for empty input,
    /// characters outside `[A-Za-z0-9._-]`, or the reserved `latest`.
    pub fn new(raw: &str) -> Result<Self, OpsError> {
        if raw.is_empty() {
            return Err(OpsError::precondition("--run-id", "must not be empty"));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(OpsError::precondition(
                "--run-id",
                format!("invalid character {bad:?} (allowed: A-Z a-z 0-9 . _ -)"),
            ));
        }
        if raw == LATEST_STEM || raw.starts_with('.') {
            return Err(OpsError::precondition(
                "--run-id",
                format!("{raw:?} is reserved"),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Paths produced by one [`ArtifactWriter::write`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub run: PathBuf,
    pub latest: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_markdown: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_markdown: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Create the artifact directory and refuse a run id that was already
    /// written. Call before doing any work the artifact will record.
    ///
    /// # Errors
    ///
    /// [`ArtifactError::CreateDir`] or [`ArtifactError::AlreadyExists`].
    pub fn prepare(&self, run_id: &RunId) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let run = self.run_path(run_id);
        if run.exists() {
            return Err(ArtifactError::AlreadyExists { path: run });
        }
        Ok(())
    }

    /// Persist `document` as pretty JSON under the run id and as `latest`,
    /// with an optional markdown rendering beside each.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if the directory cannot be created, the run
    /// file already exists, serialization fails, or a write fails.
    pub fn write<T: Serialize>(
        &self,
        run_id: &RunId,
        document: &T,
        markdown: Option<&str>,
    ) -> Result<ArtifactPaths, ArtifactError> {
        self.prepare(run_id)?;
        let mut bytes = serde_json::to_vec_pretty(document)?;
        bytes.push(b'\n');

        let run = self.run_path(run_id);
        let latest = self.dir.join(format!("{LATEST_STEM}.json"));
        atomic_write(&run, &bytes)?;
        atomic_write(&latest, &bytes)?;

        let (run_markdown, latest_markdown) = match markdown {
            Some(text) => {
                let run_md = self.dir.join(format!("{run_id}.md"));
                let latest_md = self.dir.join(format!("{LATEST_STEM}.md"));
                atomic_write(&run_md, text.as_bytes())?;
                atomic_write(&latest_md, text.as_bytes())?;
                (Some(run_md), Some(latest_md))
            }
            None => (None, None),
        };

        tracing::info!(path = %run.display(), "artifact written");
        Ok(ArtifactPaths {
            run,
            latest,
            run_markdown,
            latest_markdown,
        })
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, bytes).map_err(write_err)?;
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(source));
    }
    Ok(())
}
