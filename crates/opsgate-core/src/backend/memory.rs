use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::IssueBackend;
use crate::error::AdapterError;
use crate::model::{Comment, CreatedItem, ItemState, LabelChange, NewItem, WorkItem};

/// Backend capability, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
    ListOpen,
    Comments,
    Labels,
    AddComment,
    SetLabels,
    CreateItem,
    CloseItem,
}

impl BackendOp {
    const fn operation(self) -> &'static str {
        match self {
            Self::ListOpen => "issues:list",
            Self::Comments => "issues:comments",
            Self::Labels => "issues:labels",
            Self::AddComment => "issues:comment",
            Self::SetLabels => "issues:set-labels",
            Self::CreateItem => "issues:create",
            Self::CloseItem => "issues:close",
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: BackendOp,
    number: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<u64, WorkItem>,
    comments: BTreeMap<u64, Vec<Comment>>,
    faults: Vec<Fault>,
    created: Vec<u64>,
    label_updates: Vec<u64>,
}

/// In-memory issue tracker with fault injection.
///
/// Items are listed in ascending number order. Comments and items created
/// through the trait are authored by `actor` at the backend's `now`.
#[derive(Debug)]
pub struct MemoryBackend {
    actor: String,
    now: RefCell<DateTime<Utc>>,
    base_url: String,
    omit_created_number: RefCell<bool>,
    state: RefCell<State>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(actor: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            now: RefCell::new(now),
            base_url: "https://tracker.invalid/acme/repo".to_string(),
            omit_created_number: RefCell::new(false),
            state: RefCell::new(State::default()),
        }
    }

    /// Move the backend clock used for new comments and items.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.borrow_mut() = now;
    }

    /// Seed an open item.
    pub fn insert_item(&self, number: u64, title: &str, body: &str, labels: &[&str]) {
        let item = WorkItem {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            state: ItemState::Open,
            url: format!("{}/issues/{number}", self.base_url),
            created_at: *self.now.borrow(),
        };
        self.state.borrow_mut().items.insert(number, item);
    }

    /// Seed a comment with an explicit author and timestamp.
    pub fn push_comment(&self, number: u64, author: &str, created_at: DateTime<Utc>, body: &str) {
        self.state
            .borrow_mut()
            .comments
            .entry(number)
            .or_default()
            .push(Comment {
                author: author.to_string(),
                created_at,
                body: body.to_string(),
            });
    }

    /// Make every call of `op` fail, or only calls for item `number`.
    pub fn fail_on(&self, op: BackendOp, number: Option<u64>) {
        self.state.borrow_mut().faults.push(Fault { op, number });
    }

    pub fn clear_faults(&self) {
        self.state.borrow_mut().faults.clear();
    }

    /// Return locators without an `/issues/<n>` segment from `create_item`.
    pub fn omit_created_numbers(&self) {
        *self.omit_created_number.borrow_mut() = true;
    }

    #[must_use]
    pub fn item(&self, number: u64) -> Option<WorkItem> {
        self.state.borrow().items.get(&number).cloned()
    }

    #[must_use]
    pub fn comments(&self, number: u64) -> Vec<Comment> {
        self.state
            .borrow()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    /// Numbers of items created through the trait, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<u64> {
        self.state.borrow().created.clone()
    }

    /// Items whose labels were changed through the trait, one entry per call.
    #[must_use]
    pub fn label_updates(&self) -> Vec<u64> {
        self.state.borrow().label_updates.clone()
    }

    fn check(&self, op: BackendOp, number: Option<u64>) -> Result<(), AdapterError> {
        let state = self.state.borrow();
        let hit = state
            .faults
            .iter()
            .any(|f| f.op == op && (f.number.is_none() || f.number == number));
        if hit {
            return Err(AdapterError::transport(op.operation(), "injected fault"));
        }
        Ok(())
    }

    fn missing(op: BackendOp, number: u64) -> AdapterError {
        AdapterError::Status {
            operation: op.operation().to_string(),
            status: 404,
            message: format!("item #{number} not found"),
        }
    }
}

impl IssueBackend for MemoryBackend {
    fn list_open(&self, label: Option<&str>) -> Result<Vec<WorkItem>, AdapterError> {
        self.check(BackendOp::ListOpen, None)?;
        Ok(self
            .state
            .borrow()
            .items
            .values()
            .filter(|item| item.state == ItemState::Open)
            .filter(|item| label.is_none_or(|l| item.has_label(l)))
            .cloned()
            .collect())
    }

    fn get_comments(&self, number: u64) -> Result<Vec<Comment>, AdapterError> {
        self.check(BackendOp::Comments, Some(number))?;
        Ok(self.comments(number))
    }

    fn get_labels(&self, number: u64) -> Result<BTreeSet<String>, AdapterError> {
        self.check(BackendOp::Labels, Some(number))?;
        self.state
            .borrow()
            .items
            .get(&number)
            .map(|item| item.labels.clone())
            .ok_or_else(|| Self::missing(BackendOp::Labels, number))
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<(), AdapterError> {
        self.check(BackendOp::AddComment, Some(number))?;
        if !self.state.borrow().items.contains_key(&number) {
            return Err(Self::missing(BackendOp::AddComment, number));
        }
        let now = *self.now.borrow();
        let actor = self.actor.clone();
        self.push_comment(number, &actor, now, body);
        Ok(())
    }

    fn set_labels(&self, number: u64, change: &LabelChange) -> Result<(), AdapterError> {
        self.check(BackendOp::SetLabels, Some(number))?;
        let mut state = self.state.borrow_mut();
        let item = state
            .items
            .get_mut(&number)
            .ok_or_else(|| Self::missing(BackendOp::SetLabels, number))?;
        item.labels = change.apply(&item.labels);
        state.label_updates.push(number);
        Ok(())
    }

    fn create_item(&self, new_item: &NewItem) -> Result<CreatedItem, AdapterError> {
        self.check(BackendOp::CreateItem, None)?;
        let number = self
            .state
            .borrow()
            .items
            .keys()
            .next_back()
            .map_or(1, |last| last + 1);
        let labels: Vec<&str> = new_item.labels.iter().map(String::as_str).collect();
        self.insert_item(number, &new_item.title, &new_item.body, &labels);
        self.state.borrow_mut().created.push(number);
        let url = if *self.omit_created_number.borrow() {
            format!("{}/created", self.base_url)
        } else {
            format!("{}/issues/{number}", self.base_url)
        };
        Ok(CreatedItem::from_url(url))
    }

    fn close_item(&self, number: u64) -> Result<(), AdapterError> {
        self.check(BackendOp::CloseItem, Some(number))?;
        let mut state = self.state.borrow_mut();
        let item = state
            .items
            .get_mut(&number)
            .ok_or_else(|| Self::missing(BackendOp::CloseItem, number))?;
        item.state = ItemState::Closed;
        Ok(())
    }
}
