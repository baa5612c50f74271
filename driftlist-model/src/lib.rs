//! Application model: lists, tasks, and the cemetery.
//!
//! This crate is the exact surface the presentation layer consumes. All
//! operations are synchronous local store mutations — the synchronizer
//! picks the resulting deltas up in the background, so nothing here ever
//! waits on the network.

mod ops;
mod rows;

pub use ops::{
    clear_cemetery, create_list, create_task, delete_list, delete_task, lists,
    permanently_delete, restore_from_cemetery, set_list_color, set_list_emoji, set_list_title,
    set_task_progress, tasks, tasks_in, toggle_task_completed, update_task, cemetery,
    TaskUpdate,
};
pub use rows::{CemeteryItem, DeletionReason, List, Task, CEMETERY, LISTS, TASKS};

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by model operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("cemetery item not found: {0}")]
    CemeteryItemNotFound(String),
}
