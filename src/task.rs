use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Entity types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// One line of a shopping list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub id: Uuid,
    pub text: String,
    pub completed: bool,
}

/// Plain task or shopping list. A shopping list carries its items and is
/// "done" exactly when every item is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Plain,
    Shopping(Vec<ShoppingItem>),
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Plain
    }
}

/// A task record as the server hands it out.
///
/// `order` is advisory: ties are broken by `created_at`, and the client
/// never enforces uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub order: i64,
    pub kind: TaskKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Uuid,
}

impl Task {
    /// A fresh, incomplete plain task.
    pub fn new(id: Uuid, user_id: Uuid, title: impl Into<String>, order: i64) -> Self {
        let now = Utc::now();
        Task {
            id,
            title: title.into(),
            description: None,
            completed: false,
            priority: Priority::default(),
            due_date: None,
            order,
            kind: TaskKind::Plain,
            created_at: now,
            updated_at: now,
            user_id,
        }
    }

    pub fn is_shopping_list(&self) -> bool {
        matches!(self.kind, TaskKind::Shopping(_))
    }

    pub fn shopping_items(&self) -> &[ShoppingItem] {
        match &self.kind {
            TaskKind::Shopping(items) => items,
            TaskKind::Plain => &[],
        }
    }

    /// Set one shopping item's flag and re-derive `completed` from all items.
    /// Returns false when the item does not exist (the record is untouched).
    pub fn set_shopping_item(&mut self, item_id: Uuid, completed: bool) -> bool {
        let TaskKind::Shopping(items) = &mut self.kind else {
            return false;
        };
        let Some(item) = items.iter_mut().find(|i| i.id == item_id) else {
            return false;
        };
        item.completed = completed;
        self.completed = items.iter().all(|i| i.completed);
        true
    }

    /// Apply every field the patch carries.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
    }
}

/// Partial update. `None` leaves the field alone; for the optional fields
/// `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        TaskPatch {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }
}

/// Fields a create call carries. The server assigns id, order and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    /// Item texts; non-empty means the task is created as a shopping list.
    pub shopping_items: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        NewTask {
            title: title.into(),
            ..Default::default()
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
