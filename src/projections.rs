//! Projection policies.
//!
//! Pure functions from (mutation input, previous list) to the list the UI
//! should show while the remote call is in flight. None of them fail: an id
//! that is not in the list is simply not touched.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::remote::BulkAction;
use crate::task::{Task, TaskPatch};

/// Apply `patch` to the record with `id`.
pub fn update(list: &[Task], id: Uuid, patch: &TaskPatch) -> Vec<Task> {
    list.iter()
        .map(|task| {
            let mut task = task.clone();
            if task.id == id {
                task.apply_patch(patch);
            }
            task
        })
        .collect()
}

/// Set `completed` on the record with `id`.
pub fn toggle(list: &[Task], id: Uuid, completed: bool) -> Vec<Task> {
    list.iter()
        .map(|task| {
            let mut task = task.clone();
            if task.id == id {
                task.completed = completed;
            }
            task
        })
        .collect()
}

/// Drop the record with `id`.
pub fn delete(list: &[Task], id: Uuid) -> Vec<Task> {
    list.iter().filter(|t| t.id != id).cloned().collect()
}

/// Drop every completed record.
pub fn delete_completed(list: &[Task]) -> Vec<Task> {
    list.iter().filter(|t| !t.completed).cloned().collect()
}

/// Re-sequence by `ids`.
///
/// Records named in `ids` come first, in that order; the rest follow in
/// their previous relative order. Every record gets its new position as
/// `order`. Unknown ids and repeats are ignored.
pub fn reorder(list: &[Task], ids: &[Uuid]) -> Vec<Task> {
    let by_id: HashMap<Uuid, &Task> = list.iter().map(|t| (t.id, t)).collect();
    let mut placed: HashSet<Uuid> = HashSet::with_capacity(ids.len());
    let mut out: Vec<Task> = Vec::with_capacity(list.len());

    for id in ids {
        if let Some(task) = by_id.get(id) {
            if placed.insert(*id) {
                out.push((*task).clone());
            }
        }
    }
    for task in list {
        if !placed.contains(&task.id) {
            out.push(task.clone());
        }
    }
    for (position, task) in out.iter_mut().enumerate() {
        task.order = position as i64;
    }
    out
}

/// Apply the single-record rule for `action` to every id in `ids`.
pub fn bulk(list: &[Task], ids: &[Uuid], action: BulkAction) -> Vec<Task> {
    let targets: HashSet<Uuid> = ids.iter().copied().collect();
    match action {
        BulkAction::Delete => list.iter().filter(|t| !targets.contains(&t.id)).cloned().collect(),
        BulkAction::Complete | BulkAction::Incomplete => {
            let completed = action == BulkAction::Complete;
            list.iter()
                .map(|task| {
                    let mut task = task.clone();
                    if targets.contains(&task.id) {
                        task.completed = completed;
                    }
                    task
                })
                .collect()
        }
    }
}

/// Flip one shopping item on its parent and re-derive the parent's
/// `completed` from all of its items.
pub fn shopping_item(list: &[Task], task_id: Uuid, item_id: Uuid, completed: bool) -> Vec<Task> {
    list.iter()
        .map(|task| {
            let mut task = task.clone();
            if task.id == task_id {
                task.set_shopping_item(item_id, completed);
            }
            task
        })
        .collect()
}

/// Put `restored` records back, replacing any copy already present, and
/// keep the list in display order.
pub fn restore(list: &[Task], restored: &[Task]) -> Vec<Task> {
    let incoming: HashSet<Uuid> = restored.iter().map(|t| t.id).collect();
    let mut out: Vec<Task> = list.iter().filter(|t| !incoming.contains(&t.id)).cloned().collect();
    out.extend(restored.iter().cloned());
    out.sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
    out
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ShoppingItem, TaskKind};
    use chrono::{Duration, Utc};

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn task(n: u128, order: i64) -> Task {
        let mut t = Task::new(id(n), Uuid::nil(), format!("task {n}"), order);
        t.created_at = Utc::now() + Duration::milliseconds(n as i64);
        t.updated_at = t.created_at;
        t
    }

    fn ids(list: &[Task]) -> Vec<Uuid> {
        list.iter().map(|t| t.id).collect()
    }

    fn orders(list: &[Task]) -> Vec<i64> {
        list.iter().map(|t| t.order).collect()
    }

    #[test]
    fn update_only_touches_target() {
        let list = vec![task(1, 0), task(2, 1)];
        let out = update(&list, id(2), &TaskPatch::title("renamed"));
        assert_eq!(out[0], list[0]);
        assert_eq!(out[1].title, "renamed");
    }

    #[test]
    fn toggle_twice_returns_to_original() {
        let list = vec![task(1, 0), task(2, 1)];
        let once = toggle(&list, id(1), true);
        assert!(once[0].completed);
        let twice = toggle(&once, id(1), false);
        assert_eq!(twice, list);
    }

    #[test]
    fn delete_filters_target() {
        let list = vec![task(1, 0), task(2, 1)];
        assert_eq!(ids(&delete(&list, id(1))), vec![id(2)]);
        assert_eq!(delete(&list, id(9)), list);
    }

    #[test]
    fn reorder_follows_given_sequence() {
        let list = vec![task(1, 0), task(2, 1), task(3, 2)];
        let out = reorder(&list, &[id(3), id(1), id(2)]);
        assert_eq!(ids(&out), vec![id(3), id(1), id(2)]);
        assert_eq!(orders(&out), vec![0, 1, 2]);
    }

    #[test]
    fn reorder_is_a_permutation() {
        let list: Vec<Task> = (1..=6).map(|n| task(n, n as i64)).collect();
        let sequence = [id(4), id(2), id(6), id(1), id(5), id(3)];
        let out = reorder(&list, &sequence);

        let mut before = ids(&list);
        let mut after = ids(&out);
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(ids(&out), sequence.to_vec());
        assert_eq!(orders(&out), (0..6).collect::<Vec<i64>>());
    }

    #[test]
    fn reorder_appends_unmentioned_in_previous_order() {
        let list = vec![task(1, 0), task(2, 1), task(3, 2), task(4, 3)];
        let out = reorder(&list, &[id(3), id(9), id(3)]);
        assert_eq!(ids(&out), vec![id(3), id(1), id(2), id(4)]);
        assert_eq!(orders(&out), vec![0, 1, 2, 3]);
    }

    #[test]
    fn bulk_delete_removes_exactly_targets() {
        let list = vec![task(1, 0), task(2, 1), task(3, 2), task(4, 3)];
        let out = bulk(&list, &[id(2), id(4)], BulkAction::Delete);
        assert_eq!(ids(&out), vec![id(1), id(3)]);
    }

    #[test]
    fn bulk_complete_and_incomplete() {
        let list = vec![task(1, 0), task(2, 1), task(3, 2)];
        let done = bulk(&list, &[id(1), id(2)], BulkAction::Complete);
        assert_eq!(done.iter().map(|t| t.completed).collect::<Vec<_>>(), vec![true, true, false]);

        let undone = bulk(&done, &[id(2)], BulkAction::Incomplete);
        assert_eq!(undone.iter().map(|t| t.completed).collect::<Vec<_>>(), vec![true, false, false]);
    }

    #[test]
    fn shopping_parent_follows_items() {
        let mut parent = task(1, 0);
        parent.kind = TaskKind::Shopping(vec![
            ShoppingItem { id: id(10), text: "milk".into(), completed: false },
            ShoppingItem { id: id(11), text: "eggs".into(), completed: false },
        ]);
        let list = vec![parent, task(2, 1)];

        let list = shopping_item(&list, id(1), id(10), true);
        assert!(!list[0].completed);
        let list = shopping_item(&list, id(1), id(11), true);
        assert!(list[0].completed);
        let list = shopping_item(&list, id(1), id(10), false);
        assert!(!list[0].completed);
        assert!(!list[1].completed);
    }

    #[test]
    fn restore_puts_records_back_in_order() {
        let list = vec![task(1, 0), task(3, 2)];
        let out = restore(&list, &[task(2, 1)]);
        assert_eq!(ids(&out), vec![id(1), id(2), id(3)]);

        let again = restore(&out, &[task(2, 1)]);
        assert_eq!(ids(&again), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn delete_completed_keeps_active() {
        let mut done = task(1, 0);
        done.completed = true;
        let list = vec![done, task(2, 1)];
        assert_eq!(ids(&delete_completed(&list)), vec![id(2)]);
    }
}
