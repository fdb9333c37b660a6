//! Task record data model for `Taskboard`.
//!
//! Defines the authoritative [`TaskRecord`], its enumerated fields, and the
//! two mutation shapes: [`TaskDraft`] / [`TaskPatch`] as they travel on the
//! wire (enum fields are plain strings so that the authority can reject
//! unknown values), and [`NewTask`] / [`TaskChanges`] as their validated forms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reasons a draft, patch, or status string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A create request carried no title at all.
    #[error("title is required")]
    TitleMissing,
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds [`MAX_TASK_TITLE_LENGTH`].
    #[error("task title too long (max 256 characters)")]
    TitleTooLong,
    /// Priority string is not one of `low`, `medium`, `high`.
    #[error("invalid priority: {0}")]
    InvalidPriority(String),
    /// Category string is not one of `bug`, `feature`, `enhancement`.
    #[error("invalid category: {0}")]
    InvalidCategory(String),
    /// Status string is not one of `todo`, `in-progress`, `done`.
    #[error("invalid status: {0}")]
    InvalidStatus(String),
}

/// Checks that a title is non-empty and within the length limit.
///
/// # Errors
///
/// Returns [`ValidationError::TitleEmpty`] or [`ValidationError::TitleTooLong`].
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::TitleEmpty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(ValidationError::TitleTooLong);
    }
    Ok(())
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    /// Can wait.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Needs attention first.
    High,
}

impl Priority {
    /// Wire and display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

/// Task category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Something is broken.
    Bug,
    /// The default.
    #[default]
    Feature,
    /// Improvement to existing behavior.
    Enhancement,
}

impl Category {
    /// Wire and display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Enhancement => "enhancement",
        }
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "enhancement" => Ok(Self::Enhancement),
            other => Err(ValidationError::InvalidCategory(other.to_string())),
        }
    }
}

/// Board column of a task. This is the only field that drives placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Completed.
    Done,
}

impl TaskStatus {
    /// All statuses in column order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];

    /// Wire and display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Priority, Category, TaskStatus);

/// A task as stored by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Server-assigned identifier, stable for the record's lifetime.
    pub id: TaskId,
    /// Non-empty title.
    pub title: String,
    /// Priority, `medium` unless given.
    pub priority: Priority,
    /// Category, `feature` unless given.
    pub category: Category,
    /// Board column, `todo` unless given.
    pub status: TaskStatus,
    /// Optional opaque attachment reference.
    pub attachment: Option<String>,
    /// Creation time (milliseconds since epoch).
    pub created_at: u64,
    /// Last modification time (milliseconds since epoch), strictly
    /// increasing per record.
    pub updated_at: u64,
}

impl TaskRecord {
    /// Builds a record from validated fields.
    #[must_use]
    pub fn from_new(id: TaskId, task: NewTask, now_ms: u64) -> Self {
        Self {
            id,
            title: task.title,
            priority: task.priority,
            category: task.category,
            status: task.status,
            attachment: task.attachment,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

/// Create request fields as sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    /// Required; `None` and `""` are both rejected.
    pub title: Option<String>,
    /// Priority name, defaults to `medium`.
    pub priority: Option<String>,
    /// Category name, defaults to `feature`.
    pub category: Option<String>,
    /// Status name, defaults to `todo`.
    pub status: Option<String>,
    /// Attachment reference.
    pub attachment: Option<String>,
}

impl TaskDraft {
    /// Validates the draft, filling in enum defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a missing or bad title or an
    /// unknown enum name.
    pub fn validate(self) -> Result<NewTask, ValidationError> {
        let title = self.title.ok_or(ValidationError::TitleMissing)?;
        validate_title(&title)?;
        Ok(NewTask {
            title,
            priority: self.priority.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
            category: self.category.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
            status: self.status.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
            attachment: self.attachment,
        })
    }
}

/// Validated create fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Non-empty title.
    pub title: String,
    /// Priority.
    pub priority: Priority,
    /// Category.
    pub category: Category,
    /// Initial column.
    pub status: TaskStatus,
    /// Attachment reference.
    pub attachment: Option<String>,
}

impl NewTask {
    /// A task with the given title and default enum fields.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: Priority::default(),
            category: Category::default(),
            status: TaskStatus::default(),
            attachment: None,
        }
    }

    /// Converts back to the wire shape.
    #[must_use]
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            title: Some(self.title.clone()),
            priority: Some(self.priority.as_str().to_string()),
            category: Some(self.category.as_str().to_string()),
            status: Some(self.status.as_str().to_string()),
            attachment: self.attachment.clone(),
        }
    }
}

/// Partial update fields as sent on the wire. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New priority name.
    pub priority: Option<String>,
    /// New category name.
    pub category: Option<String>,
    /// New status name.
    pub status: Option<String>,
    /// `Some(None)` clears the attachment.
    pub attachment: Option<Option<String>>,
}

impl TaskPatch {
    /// Validates every field present in the patch.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a bad title or an unknown enum name.
    pub fn validate(self) -> Result<TaskChanges, ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        Ok(TaskChanges {
            title: self.title,
            priority: self.priority.as_deref().map(str::parse).transpose()?,
            category: self.category.as_deref().map(str::parse).transpose()?,
            status: self.status.as_deref().map(str::parse).transpose()?,
            attachment: self.attachment,
        })
    }
}

/// Validated partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChanges {
    /// New title.
    pub title: Option<String>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New category.
    pub category: Option<Category>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// `Some(None)` clears the attachment.
    pub attachment: Option<Option<String>>,
}

impl TaskChanges {
    /// Returns `true` if no field would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.status.is_none()
            && self.attachment.is_none()
    }

    /// Overwrites the fields present in `self`. Timestamps are untouched.
    pub fn apply_to(&self, record: &mut TaskRecord) {
        if let Some(title) = &self.title {
            record.title.clone_from(title);
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(category) = self.category {
            record.category = category;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(attachment) = &self.attachment {
            record.attachment.clone_from(attachment);
        }
    }

    /// Captures the current values in `record` of every field `self` touches.
    ///
    /// Applying the result after `self` restores those fields.
    #[must_use]
    pub fn inverse_for(&self, record: &TaskRecord) -> Self {
        Self {
            title: self.title.as_ref().map(|_| record.title.clone()),
            priority: self.priority.map(|_| record.priority),
            category: self.category.map(|_| record.category),
            status: self.status.map(|_| record.status),
            attachment: self.attachment.as_ref().map(|_| record.attachment.clone()),
        }
    }

    /// Converts to the wire shape.
    #[must_use]
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: self.title.clone(),
            priority: self.priority.map(|p| p.as_str().to_string()),
            category: self.category.map(|c| c.as_str().to_string()),
            status: self.status.map(|s| s.as_str().to_string()),
            attachment: self.attachment.clone(),
        }
    }
}
