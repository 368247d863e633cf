//! Narrow capability set over the work-tracking system.
//!
//! Use cases only talk to [`IssueBackend`]; the concrete client (HTTP,
//! in-memory) is chosen by the caller.

mod memory;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::AdapterError;
use crate::model::{Comment, CreatedItem, LabelChange, NewItem, WorkItem};

pub use memory::{BackendOp, MemoryBackend};

pub trait IssueBackend {
    /// Open items, optionally restricted to those carrying `label`, in
    /// backend order.
    fn list_open(&self, label: Option<&str>) -> Result<Vec<WorkItem>, AdapterError>;

    /// Titles of all open items mapped to their number. On duplicate titles
    /// the first listed item wins.
    fn list_open_titles(&self) -> Result<BTreeMap<String, u64>, AdapterError> {
        let mut titles = BTreeMap::new();
        for item in self.list_open(None)? {
            titles.entry(item.title).or_insert(item.number);
        }
        Ok(titles)
    }

    fn get_comments(&self, number: u64) -> Result<Vec<Comment>, AdapterError>;

    fn get_labels(&self, number: u64) -> Result<BTreeSet<String>, AdapterError>;

    fn add_comment(&self, number: u64, body: &str) -> Result<(), AdapterError>;

    /// Apply the removals and additions as one update where the backend
    /// allows it.
    fn set_labels(&self, number: u64, change: &LabelChange) -> Result<(), AdapterError>;

    fn create_item(&self, item: &NewItem) -> Result<CreatedItem, AdapterError>;

    fn close_item(&self, number: u64) -> Result<(), AdapterError>;
}
