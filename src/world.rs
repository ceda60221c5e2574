use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::projections;
use crate::remote::BulkAction;
use crate::task::{NewTask, ShoppingItem, Task, TaskKind, TaskPatch};

pub const TITLE_MAX: usize = 128;

/// How many deleted batches are kept for undo, across all owners.
pub const TRASH_DEPTH: usize = 16;

// ── Commands (client → server) ────────────────────────────────

/// A command is something a client wants to happen.
/// The world validates it, applies it, and returns an Event (or an error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateTask {
        new: NewTask,
    },
    UpdateTask {
        task_id: Uuid,
        patch: TaskPatch,
    },
    ToggleTask {
        task_id: Uuid,
        completed: bool,
    },
    DeleteTask {
        task_id: Uuid,
    },
    Reorder {
        ids: Vec<Uuid>,
    },
    Bulk {
        ids: Vec<Uuid>,
        action: BulkAction,
    },
    DeleteCompleted,
    UndoLastDelete,
    SetShoppingItem {
        task_id: Uuid,
        item_id: Uuid,
        completed: bool,
    },
}

// ── Events ────────────────────────────────────────────────────

/// What actually happened. Each event carries the revision it was applied at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TaskCreated {
        revision: u64,
        task: Task,
    },
    /// One record changed in place (update, toggle, shopping item).
    TaskUpdated {
        revision: u64,
        task: Task,
    },
    /// Several records changed in place (reorder, bulk complete).
    TasksChanged {
        revision: u64,
        tasks: Vec<Task>,
    },
    /// Records moved to the trash (delete, bulk delete, clear completed).
    TasksDeleted {
        revision: u64,
        tasks: Vec<Task>,
    },
    TasksRestored {
        revision: u64,
        tasks: Vec<Task>,
    },
}

impl Event {
    pub fn revision(&self) -> u64 {
        match self {
            Event::TaskCreated { revision, .. }
            | Event::TaskUpdated { revision, .. }
            | Event::TasksChanged { revision, .. }
            | Event::TasksDeleted { revision, .. }
            | Event::TasksRestored { revision, .. } => *revision,
        }
    }

    /// Number of records the event touched.
    pub fn affected(&self) -> usize {
        match self {
            Event::TaskCreated { .. } | Event::TaskUpdated { .. } => 1,
            Event::TasksChanged { tasks, .. }
            | Event::TasksDeleted { tasks, .. }
            | Event::TasksRestored { tasks, .. } => tasks.len(),
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    TaskNotFound,
    ItemNotFound,
    EmptyTitle,
    TitleTooLong,
    /// Trash holds nothing for this owner.
    NothingToUndo,
    /// Task exists but belongs to someone else.
    NotOwner,
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::TaskNotFound => write!(f, "task not found"),
            WorldError::ItemNotFound => write!(f, "shopping item not found"),
            WorldError::EmptyTitle => write!(f, "title must not be empty"),
            WorldError::TitleTooLong => write!(f, "title is too long"),
            WorldError::NothingToUndo => write!(f, "nothing to undo"),
            WorldError::NotOwner => write!(f, "task belongs to another user"),
        }
    }
}

impl std::error::Error for WorldError {}

// ── The World ──────────────────────────────────────────────────

/// Authoritative task state. Lives in memory, loaded from redb on boot.
/// All mutations go through apply() which validates, mutates, and returns
/// an Event to flush.
pub struct World {
    pub tasks: HashMap<Uuid, Task>,
    pub revision: u64,
    /// Deleted batches, newest last, tagged with their owner.
    pub trash: Vec<(Uuid, Vec<Task>)>,
    title_max: usize,
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

impl World {
    pub fn new() -> Self {
        World::with_title_max(TITLE_MAX)
    }

    pub fn with_title_max(title_max: usize) -> Self {
        World {
            tasks: HashMap::new(),
            revision: 0,
            trash: Vec::new(),
            title_max,
        }
    }

    /// Apply a command on behalf of `user_id`. Every state change goes
    /// through here; a rejected command changes nothing.
    pub fn apply(&mut self, cmd: Command, user_id: Uuid) -> Result<Event, WorldError> {
        let event = match cmd {
            Command::CreateTask { new } => {
                self.validate_title(&new.title)?;
                let order = self
                    .tasks
                    .values()
                    .filter(|t| t.user_id == user_id)
                    .map(|t| t.order + 1)
                    .max()
                    .unwrap_or(0);

                let mut task = Task::new(Uuid::new_v4(), user_id, new.title.trim(), order);
                task.description = new.description;
                task.priority = new.priority.unwrap_or_default();
                task.due_date = new.due_date;
                if !new.shopping_items.is_empty() {
                    task.kind = TaskKind::Shopping(
                        new.shopping_items
                            .into_iter()
                            .map(|text| ShoppingItem { id: Uuid::new_v4(), text, completed: false })
                            .collect(),
                    );
                }

                self.tasks.insert(task.id, task.clone());
                Event::TaskCreated { revision: self.next_revision(), task }
            }

            Command::UpdateTask { task_id, patch } => {
                if let Some(title) = &patch.title {
                    self.validate_title(title)?;
                }
                let task = self.owned_mut(task_id, user_id)?;
                task.apply_patch(&patch);
                task.updated_at = Utc::now();
                let task = task.clone();
                Event::TaskUpdated { revision: self.next_revision(), task }
            }

            Command::ToggleTask { task_id, completed } => {
                let task = self.owned_mut(task_id, user_id)?;
                task.completed = completed;
                task.updated_at = Utc::now();
                let task = task.clone();
                Event::TaskUpdated { revision: self.next_revision(), task }
            }

            Command::DeleteTask { task_id } => {
                self.owned_mut(task_id, user_id)?;
                let removed = self.remove_batch(user_id, &[task_id]);
                Event::TasksDeleted { revision: self.next_revision(), tasks: removed }
            }

            Command::Reorder { ids } => {
                let list = self.tasks_for(user_id);
                let now = Utc::now();
                let mut changed = Vec::new();
                for task in projections::reorder(&list, &ids) {
                    if let Some(current) = self.tasks.get_mut(&task.id) {
                        if current.order != task.order {
                            current.order = task.order;
                            current.updated_at = now;
                            changed.push(current.clone());
                        }
                    }
                }
                Event::TasksChanged { revision: self.next_revision(), tasks: changed }
            }

            Command::Bulk { ids, action } => {
                let owned: Vec<Uuid> = ids
                    .into_iter()
                    .filter(|id| self.tasks.get(id).map(|t| t.user_id == user_id).unwrap_or(false))
                    .collect();
                match action {
                    BulkAction::Delete => {
                        let removed = self.remove_batch(user_id, &owned);
                        Event::TasksDeleted { revision: self.next_revision(), tasks: removed }
                    }
                    BulkAction::Complete | BulkAction::Incomplete => {
                        let completed = action == BulkAction::Complete;
                        let now = Utc::now();
                        let mut changed = Vec::with_capacity(owned.len());
                        for id in &owned {
                            if let Some(task) = self.tasks.get_mut(id) {
                                task.completed = completed;
                                task.updated_at = now;
                                changed.push(task.clone());
                            }
                        }
                        Event::TasksChanged { revision: self.next_revision(), tasks: changed }
                    }
                }
            }

            Command::DeleteCompleted => {
                let done: Vec<Uuid> = self
                    .tasks_for(user_id)
                    .into_iter()
                    .filter(|t| t.completed)
                    .map(|t| t.id)
                    .collect();
                let removed = self.remove_batch(user_id, &done);
                Event::TasksDeleted { revision: self.next_revision(), tasks: removed }
            }

            Command::UndoLastDelete => {
                let index = self
                    .trash
                    .iter()
                    .rposition(|(owner, _)| *owner == user_id)
                    .ok_or(WorldError::NothingToUndo)?;
                let (_, batch) = self.trash.remove(index);
                for task in &batch {
                    self.tasks.insert(task.id, task.clone());
                }
                Event::TasksRestored { revision: self.next_revision(), tasks: batch }
            }

            Command::SetShoppingItem { task_id, item_id, completed } => {
                let task = self.owned_mut(task_id, user_id)?;
                if !task.set_shopping_item(item_id, completed) {
                    return Err(WorldError::ItemNotFound);
                }
                task.updated_at = Utc::now();
                let task = task.clone();
                Event::TaskUpdated { revision: self.next_revision(), task }
            }
        };

        Ok(event)
    }

    /// One owner's tasks in display order (order, then creation time).
    pub fn tasks_for(&self, user_id: Uuid) -> Vec<Task> {
        let mut list: Vec<Task> = self.tasks.values().filter(|t| t.user_id == user_id).cloned().collect();
        list.sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
        list
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn owned_mut(&mut self, task_id: Uuid, user_id: Uuid) -> Result<&mut Task, WorldError> {
        let task = self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)?;
        if task.user_id != user_id {
            return Err(WorldError::NotOwner);
        }
        Ok(task)
    }

    /// Move `ids` to the trash as one batch. An empty batch is not kept.
    fn remove_batch(&mut self, user_id: Uuid, ids: &[Uuid]) -> Vec<Task> {
        let removed: Vec<Task> = ids.iter().filter_map(|id| self.tasks.remove(id)).collect();
        if !removed.is_empty() {
            self.trash.push((user_id, removed.clone()));
            if self.trash.len() > TRASH_DEPTH {
                self.trash.remove(0);
            }
        }
        removed
    }

    fn validate_title(&self, title: &str) -> Result<(), WorldError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WorldError::EmptyTitle);
        }
        if title.chars().count() > self.title_max {
            return Err(WorldError::TitleTooLong);
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────
