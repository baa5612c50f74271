//! The operation set the presentation layer calls.

use crate::rows::{CemeteryItem, DeletionReason, List, Task, CEMETERY, LISTS, TASKS};
use crate::{ModelError, ModelResult};
use driftlist_store::MergeableStore;
use driftlist_types::CellValue;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Lists ───────────────────────────────────────────────────────

/// Creates a list and returns its id.
pub fn create_list(store: &mut MergeableStore, title: &str, emoji: &str, color: &str) -> String {
    let id = new_id();
    store.set_row(
        LISTS,
        &id,
        [
            ("title".to_string(), CellValue::from(title)),
            ("emoji".to_string(), CellValue::from(emoji)),
            ("color".to_string(), CellValue::from(color)),
            ("createdAt".to_string(), CellValue::from(now_ms())),
        ],
    );
    id
}

pub fn set_list_title(store: &mut MergeableStore, id: &str, title: &str) -> ModelResult<()> {
    require_list(store, id)?;
    store.set_cell(LISTS, id, "title", title);
    Ok(())
}

pub fn set_list_emoji(store: &mut MergeableStore, id: &str, emoji: &str) -> ModelResult<()> {
    require_list(store, id)?;
    store.set_cell(LISTS, id, "emoji", emoji);
    Ok(())
}

pub fn set_list_color(store: &mut MergeableStore, id: &str, color: &str) -> ModelResult<()> {
    require_list(store, id)?;
    store.set_cell(LISTS, id, "color", color);
    Ok(())
}

/// Deletes a list.
///
/// The store itself never cascades; the application-level policy applied
/// here is that the list's live tasks move to the cemetery first, so they
/// stay recoverable.
pub fn delete_list(store: &mut MergeableStore, id: &str) -> ModelResult<()> {
    require_list(store, id)?;
    let orphaned: Vec<String> = tasks_in(store, id).into_iter().map(|t| t.id).collect();
    for task_id in orphaned {
        bury_task(store, &task_id, DeletionReason::ListDeleted)?;
    }
    store.delete_row(LISTS, id);
    Ok(())
}

/// All lists, in id order.
pub fn lists(store: &MergeableStore) -> Vec<List> {
    store
        .row_ids(LISTS)
        .into_iter()
        .filter_map(|id| List::read(store, id))
        .collect()
}

// ── Tasks ───────────────────────────────────────────────────────

/// Creates a task in a list and returns its id. The list must exist.
pub fn create_task(
    store: &mut MergeableStore,
    list_id: &str,
    title: &str,
    description: &str,
) -> ModelResult<String> {
    require_list(store, list_id)?;
    let id = new_id();
    let now = now_ms();
    store.set_row(
        TASKS,
        &id,
        [
            ("listId".to_string(), CellValue::from(list_id)),
            ("title".to_string(), CellValue::from(title)),
            ("description".to_string(), CellValue::from(description)),
            ("progress".to_string(), CellValue::from(0i64)),
            ("completed".to_string(), CellValue::from(false)),
            ("createdAt".to_string(), CellValue::from(now)),
            ("updatedAt".to_string(), CellValue::from(now)),
        ],
    );
    Ok(id)
}

/// Partial task update; `None` fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct TaskUpdate<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub progress: Option<u8>,
}

pub fn update_task(store: &mut MergeableStore, id: &str, update: TaskUpdate<'_>) -> ModelResult<()> {
    require_task(store, id)?;
    if let Some(title) = update.title {
        store.set_cell(TASKS, id, "title", title);
    }
    if let Some(description) = update.description {
        store.set_cell(TASKS, id, "description", description);
    }
    if let Some(progress) = update.progress {
        store.set_cell(TASKS, id, "progress", i64::from(progress.min(100)));
    }
    store.set_cell(TASKS, id, "updatedAt", now_ms());
    Ok(())
}

pub fn toggle_task_completed(store: &mut MergeableStore, id: &str) -> ModelResult<()> {
    let task = require_task(store, id)?;
    store.set_cell(TASKS, id, "completed", !task.completed);
    store.set_cell(TASKS, id, "updatedAt", now_ms());
    Ok(())
}

/// Sets progress, clamped to 0–100.
pub fn set_task_progress(store: &mut MergeableStore, id: &str, progress: u8) -> ModelResult<()> {
    require_task(store, id)?;
    store.set_cell(TASKS, id, "progress", i64::from(progress.min(100)));
    store.set_cell(TASKS, id, "updatedAt", now_ms());
    Ok(())
}

/// Deletes a task, leaving a content snapshot in the cemetery. Returns the
/// cemetery item's id.
pub fn delete_task(store: &mut MergeableStore, id: &str) -> ModelResult<String> {
    bury_task(store, id, DeletionReason::TaskDeleted)
}

fn bury_task(
    store: &mut MergeableStore,
    id: &str,
    reason: DeletionReason,
) -> ModelResult<String> {
    let task = require_task(store, id)?;
    let cemetery_id = new_id();
    store.set_row(
        CEMETERY,
        &cemetery_id,
        [
            ("originalTitle".to_string(), CellValue::from(task.title.as_str())),
            (
                "originalDescription".to_string(),
                CellValue::from(task.description.as_str()),
            ),
            (
                "originalProgress".to_string(),
                CellValue::from(i64::from(task.progress)),
            ),
            ("deletedAt".to_string(), CellValue::from(now_ms())),
            ("deletionReason".to_string(), CellValue::from(reason.to_string())),
        ],
    );
    store.delete_row(TASKS, id);
    Ok(cemetery_id)
}

/// All tasks, in id order.
pub fn tasks(store: &MergeableStore) -> Vec<Task> {
    store
        .row_ids(TASKS)
        .into_iter()
        .filter_map(|id| Task::read(store, id))
        .collect()
}

/// Tasks belonging to one list.
pub fn tasks_in(store: &MergeableStore, list_id: &str) -> Vec<Task> {
    tasks(store)
        .into_iter()
        .filter(|t| t.list_id == list_id)
        .collect()
}

// ── Cemetery ────────────────────────────────────────────────────

/// Recreates a task from a cemetery snapshot into `target_list` (snapshots
/// carry no list reference) and purges the snapshot. Returns the new task's
/// id.
pub fn restore_from_cemetery(
    store: &mut MergeableStore,
    cemetery_id: &str,
    target_list: &str,
) -> ModelResult<String> {
    let item = CemeteryItem::read(store, cemetery_id)
        .ok_or_else(|| ModelError::CemeteryItemNotFound(cemetery_id.to_string()))?;
    let task_id = create_task(store, target_list, &item.original_title, &item.original_description)?;
    store.set_cell(TASKS, &task_id, "progress", i64::from(item.original_progress));
    store.delete_row(CEMETERY, cemetery_id);
    Ok(task_id)
}

/// Purges one cemetery item for good.
pub fn permanently_delete(store: &mut MergeableStore, cemetery_id: &str) -> ModelResult<()> {
    if !store.has_row(CEMETERY, cemetery_id) {
        return Err(ModelError::CemeteryItemNotFound(cemetery_id.to_string()));
    }
    store.delete_row(CEMETERY, cemetery_id);
    Ok(())
}

/// Purges every cemetery item.
pub fn clear_cemetery(store: &mut MergeableStore) {
    let ids: Vec<String> = store.row_ids(CEMETERY).into_iter().map(String::from).collect();
    for id in ids {
        store.delete_row(CEMETERY, &id);
    }
}

/// All cemetery items, in id order.
pub fn cemetery(store: &MergeableStore) -> Vec<CemeteryItem> {
    store
        .row_ids(CEMETERY)
        .into_iter()
        .filter_map(|id| CemeteryItem::read(store, id))
        .collect()
}

// ── Lookups ─────────────────────────────────────────────────────

fn require_list(store: &MergeableStore, id: &str) -> ModelResult<List> {
    List::read(store, id).ok_or_else(|| ModelError::ListNotFound(id.to_string()))
}

fn require_task(store: &MergeableStore, id: &str) -> ModelResult<Task> {
    Task::read(store, id).ok_or_else(|| ModelError::TaskNotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftlist_types::ReplicaId;
    use pretty_assertions::assert_eq;

    fn store() -> MergeableStore {
        MergeableStore::new(ReplicaId::new("test"))
    }

    #[test]
    fn create_and_list_round_trip() {
        let mut s = store();
        let id = create_list(&mut s, "Groceries", "🛒", "#22c55e");
        let all = lists(&s);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].title, "Groceries");
        assert_eq!(all[0].emoji, "🛒");
        assert!(all[0].created_at > 0);
    }

    #[test]
    fn task_requires_an_existing_list() {
        let mut s = store();
        let err = create_task(&mut s, "nope", "t", "d").unwrap_err();
        assert_eq!(err, ModelError::ListNotFound("nope".to_string()));
    }

    #[test]
    fn task_lifecycle() {
        let mut s = store();
        let list = create_list(&mut s, "Home", "🏠", "#888888");
        let task = create_task(&mut s, &list, "Water plants", "the ferns too").unwrap();

        set_task_progress(&mut s, &task, 120).unwrap();
        let t = Task::read(&s, &task).unwrap();
        assert_eq!(t.progress, 100, "progress clamps to 100");
        assert!(!t.completed);

        toggle_task_completed(&mut s, &task).unwrap();
        assert!(Task::read(&s, &task).unwrap().completed);
        toggle_task_completed(&mut s, &task).unwrap();
        assert!(!Task::read(&s, &task).unwrap().completed);

        update_task(
            &mut s,
            &task,
            TaskUpdate { title: Some("Water all plants"), ..Default::default() },
        )
        .unwrap();
        let t = Task::read(&s, &task).unwrap();
        assert_eq!(t.title, "Water all plants");
        assert_eq!(t.description, "the ferns too");
    }

    #[test]
    fn deleting_a_task_snapshots_it_into_the_cemetery() {
        let mut s = store();
        let list = create_list(&mut s, "Home", "🏠", "#888888");
        let task = create_task(&mut s, &list, "T", "D").unwrap();
        set_task_progress(&mut s, &task, 42).unwrap();

        let grave = delete_task(&mut s, &task).unwrap();

        // The live row is gone; the snapshot holds copies of the content.
        assert!(Task::read(&s, &task).is_none());
        assert!(tasks(&s).is_empty());
        let item = CemeteryItem::read(&s, &grave).unwrap();
        assert_eq!(item.original_title, "T");
        assert_eq!(item.original_description, "D");
        assert_eq!(item.original_progress, 42);
        assert_eq!(item.deletion_reason, "task deleted");
        assert!(item.deleted_at > 0);
    }

    #[test]
    fn deleting_a_list_buries_its_tasks() {
        let mut s = store();
        let keep = create_list(&mut s, "Keep", "📌", "#111111");
        let doomed = create_list(&mut s, "Doomed", "💥", "#222222");
        let survivor = create_task(&mut s, &keep, "stays", "").unwrap();
        create_task(&mut s, &doomed, "goes 1", "").unwrap();
        create_task(&mut s, &doomed, "goes 2", "").unwrap();

        delete_list(&mut s, &doomed).unwrap();

        assert!(List::read(&s, &doomed).is_none());
        let remaining = tasks(&s);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, survivor);

        let graves = cemetery(&s);
        assert_eq!(graves.len(), 2);
        assert!(graves.iter().all(|g| g.deletion_reason == "list deleted"));
    }

    #[test]
    fn restore_recreates_the_task_in_a_target_list() {
        let mut s = store();
        let list = create_list(&mut s, "Home", "🏠", "#888888");
        let task = create_task(&mut s, &list, "Phoenix", "rises").unwrap();
        set_task_progress(&mut s, &task, 77).unwrap();
        let grave = delete_task(&mut s, &task).unwrap();

        let reborn = restore_from_cemetery(&mut s, &grave, &list).unwrap();
        let t = Task::read(&s, &reborn).unwrap();
        assert_eq!(t.title, "Phoenix");
        assert_eq!(t.description, "rises");
        assert_eq!(t.progress, 77);
        assert_eq!(t.list_id, list);
        assert!(cemetery(&s).is_empty());
    }

    #[test]
    fn cemetery_purges() {
        let mut s = store();
        let list = create_list(&mut s, "Home", "🏠", "#888888");
        for i in 0..3 {
            let t = create_task(&mut s, &list, &format!("t{i}"), "").unwrap();
            delete_task(&mut s, &t).unwrap();
        }
        assert_eq!(cemetery(&s).len(), 3);

        let first = cemetery(&s)[0].id.clone();
        permanently_delete(&mut s, &first).unwrap();
        assert_eq!(cemetery(&s).len(), 2);
        assert_eq!(
            permanently_delete(&mut s, &first),
            Err(ModelError::CemeteryItemNotFound(first))
        );

        clear_cemetery(&mut s);
        assert!(cemetery(&s).is_empty());
    }

    #[test]
    fn list_field_updaters() {
        let mut s = store();
        let id = create_list(&mut s, "Old", "📎", "#000000");
        set_list_title(&mut s, &id, "New").unwrap();
        set_list_emoji(&mut s, &id, "✨").unwrap();
        set_list_color(&mut s, &id, "#ffffff").unwrap();
        let l = List::read(&s, &id).unwrap();
        assert_eq!((l.title.as_str(), l.emoji.as_str(), l.color.as_str()), ("New", "✨", "#ffffff"));

        assert_eq!(
            set_list_title(&mut s, "missing", "x"),
            Err(ModelError::ListNotFound("missing".to_string()))
        );
    }
}
