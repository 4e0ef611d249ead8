//! Checklist items.
//!
//! A checklist item is one checkbox of a workflow phase. Items are created
//! Pending when a phase is instantiated and only ever move forward to Done,
//! with a single detour back to Pending when work on them is abandoned.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// Stable identifier of an item within a plan: `<workflow>/<phase>/<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Build an id from its parts. `position` is 1-based.
    pub fn new(workflow: &str, phase: &str, position: usize) -> Self {
        Self(format!("{workflow}/{phase}/{position}"))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl ItemStatus {
    /// Checkbox marker used when rendering.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Done => "[x]",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// One checkbox of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    id: ItemId,
    description: String,
    status: ItemStatus,
}

impl ChecklistItem {
    /// Create a pending item.
    pub fn create(id: ItemId, description: impl Into<String>) -> Self {
        Self { id, description: description.into(), status: ItemStatus::Pending }
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == ItemStatus::Done
    }

    /// Mark the item done.
    ///
    /// `current` is the tracker's in-progress item; only that item may be
    /// completed.
    pub fn mark_done(&mut self, current: Option<&ItemId>) -> EngineResult<()> {
        if current != Some(&self.id) {
            return Err(EngineError::InvalidTransition(format!(
                "'{}' is not the item in progress",
                self.id
            )));
        }
        if self.status != ItemStatus::InProgress {
            return Err(EngineError::InvalidTransition(format!(
                "'{}' is {}, expected in progress",
                self.id, self.status
            )));
        }
        self.status = ItemStatus::Done;
        Ok(())
    }

    /// Pending -> InProgress.
    pub(crate) fn begin(&mut self) -> EngineResult<()> {
        if self.status != ItemStatus::Pending {
            return Err(EngineError::InvalidTransition(format!(
                "cannot start '{}': it is {}",
                self.id, self.status
            )));
        }
        self.status = ItemStatus::InProgress;
        Ok(())
    }

    /// InProgress -> Pending.
    pub(crate) fn release(&mut self) -> EngineResult<()> {
        if self.status != ItemStatus::InProgress {
            return Err(EngineError::InvalidTransition(format!(
                "cannot abandon '{}': it is {}",
                self.id, self.status
            )));
        }
        self.status = ItemStatus::Pending;
        Ok(())
    }

    /// Copy of this item with its status reset.
    pub(crate) fn fresh(&self) -> Self {
        Self { id: self.id.clone(), description: self.description.clone(), status: ItemStatus::Pending }
    }
}
