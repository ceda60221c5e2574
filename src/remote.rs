//! Remote API contract.
//!
//! Everything the mutation core needs from the server side. Each call
//! either resolves with the server's answer or rejects with a
//! [`RemoteError`] whose message is shown to the user as-is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{NewTask, Task, TaskPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkAction {
    Complete,
    Incomplete,
    Delete,
}

impl BulkAction {
    /// Past-tense verb used in confirmations ("3 todos completed").
    pub fn verb(&self) -> &'static str {
        match self {
            BulkAction::Complete => "completed",
            BulkAction::Incomplete => "marked incomplete",
            BulkAction::Delete => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    pub task: Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub updated_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        RemoteError { message: message.into() }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Server-side operations on one owner's tasks.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(&self, owner: Uuid) -> RemoteResult<Vec<Task>>;

    async fn create(&self, owner: Uuid, new: NewTask) -> RemoteResult<Task>;

    async fn update(&self, id: Uuid, patch: TaskPatch) -> RemoteResult<Task>;

    /// Returns the deleted record so the caller can offer to undo it.
    async fn delete(&self, id: Uuid) -> RemoteResult<Deleted>;

    async fn toggle(&self, id: Uuid, completed: bool) -> RemoteResult<Task>;

    async fn reorder(&self, owner: Uuid, ids: Vec<Uuid>) -> RemoteResult<()>;

    async fn bulk(&self, owner: Uuid, ids: Vec<Uuid>, action: BulkAction) -> RemoteResult<BulkOutcome>;

    async fn delete_completed(&self, owner: Uuid) -> RemoteResult<()>;

    /// Restores whatever the last delete removed.
    async fn undo_last_delete(&self) -> RemoteResult<Vec<Task>>;

    async fn update_shopping_item(&self, task_id: Uuid, item_id: Uuid, completed: bool) -> RemoteResult<Task>;
}
