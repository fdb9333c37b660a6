//! Column grouping and progress counts over a [`BoardView`].

use serde::Serialize;
use taskboard_proto::task::{TaskRecord, TaskStatus};

use super::view::BoardView;

/// One board column: every shown record with a given status, in view order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column<'a> {
    /// Column status.
    pub status: TaskStatus,
    /// Records in the column.
    pub tasks: Vec<&'a TaskRecord>,
}

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Records in `todo`.
    pub todo: usize,
    /// Records in `in-progress`.
    pub in_progress: usize,
    /// Records in `done`.
    pub done: usize,
}

impl StatusCounts {
    /// Total number of records.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.todo + self.in_progress + self.done
    }

    /// Count for one status.
    #[must_use]
    pub const fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Todo => self.todo,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Done => self.done,
        }
    }
}

/// Groups `view` into the three fixed columns, in `todo`, `in-progress`,
/// `done` order. Empty columns are included.
#[must_use]
pub fn columns(view: &BoardView) -> [Column<'_>; 3] {
    TaskStatus::ALL.map(|status| Column {
        status,
        tasks: view.records().iter().filter(|r| r.status == status).collect(),
    })
}

/// Counts records per status.
#[must_use]
pub fn counts(view: &BoardView) -> StatusCounts {
    view.records()
        .iter()
        .fold(StatusCounts::default(), |mut counts, record| {
            match record.status {
                TaskStatus::Todo => counts.todo += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Done => counts.done += 1,
            }
            counts
        })
}
