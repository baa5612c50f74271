//! Row shapes and their cell codecs.

use driftlist_store::MergeableStore;
use driftlist_types::CellValue;
use std::fmt;

/// Table holding the user's lists.
pub const LISTS: &str = "lists";
/// Table holding tasks; each task references its list by id.
pub const TASKS: &str = "tasks";
/// Table holding content-preserving soft-delete records.
pub const CEMETERY: &str = "cemetery";

/// A list of tasks.
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub color: String,
    pub created_at: i64,
}

impl List {
    pub(crate) fn read(store: &MergeableStore, id: &str) -> Option<Self> {
        if !store.has_row(LISTS, id) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            title: text_cell(store, LISTS, id, "title"),
            emoji: text_cell(store, LISTS, id, "emoji"),
            color: text_cell(store, LISTS, id, "color"),
            created_at: number_cell(store, LISTS, id, "createdAt") as i64,
        })
    }
}

/// A task belonging to exactly one list.
///
/// `list_id` is a plain foreign key the store does not enforce; creation
/// validates it and deletion policy lives in the operations, so a dangling
/// reference can only appear through concurrent edits and is tolerated by
/// readers.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: String,
    pub list_id: String,
    pub title: String,
    pub description: String,
    pub progress: u8,
    pub completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub(crate) fn read(store: &MergeableStore, id: &str) -> Option<Self> {
        if !store.has_row(TASKS, id) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            list_id: text_cell(store, TASKS, id, "listId"),
            title: text_cell(store, TASKS, id, "title"),
            description: text_cell(store, TASKS, id, "description"),
            progress: number_cell(store, TASKS, id, "progress") as u8,
            completed: bool_cell(store, TASKS, id, "completed"),
            created_at: number_cell(store, TASKS, id, "createdAt") as i64,
            updated_at: number_cell(store, TASKS, id, "updatedAt") as i64,
        })
    }
}

/// Why a task ended up in the cemetery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionReason {
    TaskDeleted,
    ListDeleted,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionReason::TaskDeleted => write!(f, "task deleted"),
            DeletionReason::ListDeleted => write!(f, "list deleted"),
        }
    }
}

/// A content snapshot of a deleted task: holds copies, not references, so
/// the live task row is fully purged. Immutable once created except for
/// purge.
#[derive(Clone, Debug, PartialEq)]
pub struct CemeteryItem {
    pub id: String,
    pub original_title: String,
    pub original_description: String,
    pub original_progress: u8,
    pub deleted_at: i64,
    pub deletion_reason: String,
}

impl CemeteryItem {
    pub(crate) fn read(store: &MergeableStore, id: &str) -> Option<Self> {
        if !store.has_row(CEMETERY, id) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            original_title: text_cell(store, CEMETERY, id, "originalTitle"),
            original_description: text_cell(store, CEMETERY, id, "originalDescription"),
            original_progress: number_cell(store, CEMETERY, id, "originalProgress") as u8,
            deleted_at: number_cell(store, CEMETERY, id, "deletedAt") as i64,
            deletion_reason: text_cell(store, CEMETERY, id, "deletionReason"),
        })
    }
}

fn text_cell(store: &MergeableStore, table: &str, row: &str, cell: &str) -> String {
    store
        .cell(table, row, cell)
        .and_then(CellValue::as_text)
        .unwrap_or_default()
        .to_string()
}

fn number_cell(store: &MergeableStore, table: &str, row: &str, cell: &str) -> f64 {
    store
        .cell(table, row, cell)
        .and_then(CellValue::as_number)
        .unwrap_or_default()
}

fn bool_cell(store: &MergeableStore, table: &str, row: &str, cell: &str) -> bool {
    store
        .cell(table, row, cell)
        .and_then(CellValue::as_bool)
        .unwrap_or_default()
}
