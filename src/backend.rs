//! In-process task server.
//!
//! `LocalRemote` answers every `RemoteApi` call by applying a world command
//! under the write lock and flushing the resulting event to the save file,
//! all synchronously; microseconds at this scale. Each handle acts for one
//! signed-in user, the way a server resolves the caller from its session.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::persist::SaveFile;
use crate::remote::{BulkAction, BulkOutcome, Deleted, RemoteApi, RemoteError, RemoteResult};
use crate::task::{NewTask, Task, TaskPatch};
use crate::world::{Command, Event, World, WorldError};

impl From<WorldError> for RemoteError {
    fn from(e: WorldError) -> Self {
        RemoteError::new(e.to_string())
    }
}

// ── Shared state ───────────────────────────────────────────────

pub struct Backend {
    pub world: RwLock<World>,
    pub save_file: Option<SaveFile>,
}

#[derive(Clone)]
pub struct LocalRemote {
    state: Arc<Backend>,
    user_id: Uuid,
}

impl LocalRemote {
    pub fn new(world: World, save_file: Option<SaveFile>, user_id: Uuid) -> Self {
        LocalRemote {
            state: Arc::new(Backend {
                world: RwLock::new(world),
                save_file,
            }),
            user_id,
        }
    }

    /// Another session against the same server.
    pub fn as_user(&self, user_id: Uuid) -> Self {
        LocalRemote {
            state: Arc::clone(&self.state),
            user_id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn revision(&self) -> u64 {
        self.state.world.read().unwrap_or_else(PoisonError::into_inner).revision
    }

    /// The caller's tasks in display order, straight from the world.
    pub fn snapshot(&self) -> Vec<Task> {
        self.state.world.read().unwrap_or_else(PoisonError::into_inner).tasks_for(self.user_id)
    }

    /// Apply, flush, return the event. A flush failure is logged but does
    /// not fail the command: the world already changed.
    fn handle(&self, cmd: Command) -> RemoteResult<Event> {
        let mut world = self.state.world.write().unwrap_or_else(PoisonError::into_inner);
        let event = world.apply(cmd, self.user_id).map_err(|e| {
            debug!(user = %self.user_id, error = %e, "command rejected");
            RemoteError::from(e)
        })?;
        if let Some(save_file) = &self.state.save_file {
            if let Err(e) = save_file.flush(&world, &event) {
                warn!(revision = event.revision(), error = %e, "save file flush failed");
            }
        }
        Ok(event)
    }

    fn check_owner(&self, owner: Uuid) -> RemoteResult<()> {
        if owner == self.user_id {
            Ok(())
        } else {
            Err(WorldError::NotOwner.into())
        }
    }
}

fn single(event: Event) -> RemoteResult<Task> {
    match event {
        Event::TaskCreated { task, .. } | Event::TaskUpdated { task, .. } => Ok(task),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(event: &Event) -> RemoteError {
    RemoteError::new(format!("unexpected event at revision {}", event.revision()))
}

// ── RemoteApi ──────────────────────────────────────────────────

#[async_trait]
impl RemoteApi for LocalRemote {
    async fn list(&self, owner: Uuid) -> RemoteResult<Vec<Task>> {
        self.check_owner(owner)?;
        Ok(self.snapshot())
    }

    async fn create(&self, owner: Uuid, new: NewTask) -> RemoteResult<Task> {
        self.check_owner(owner)?;
        single(self.handle(Command::CreateTask { new })?)
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> RemoteResult<Task> {
        single(self.handle(Command::UpdateTask { task_id: id, patch })?)
    }

    async fn delete(&self, id: Uuid) -> RemoteResult<Deleted> {
        match self.handle(Command::DeleteTask { task_id: id })? {
            Event::TasksDeleted { tasks, .. } => tasks
                .into_iter()
                .next()
                .map(|task| Deleted { task })
                .ok_or_else(|| WorldError::TaskNotFound.into()),
            other => Err(unexpected(&other)),
        }
    }

    async fn toggle(&self, id: Uuid, completed: bool) -> RemoteResult<Task> {
        single(self.handle(Command::ToggleTask { task_id: id, completed })?)
    }

    async fn reorder(&self, owner: Uuid, ids: Vec<Uuid>) -> RemoteResult<()> {
        self.check_owner(owner)?;
        self.handle(Command::Reorder { ids })?;
        Ok(())
    }

    async fn bulk(&self, owner: Uuid, ids: Vec<Uuid>, action: BulkAction) -> RemoteResult<BulkOutcome> {
        self.check_owner(owner)?;
        let event = self.handle(Command::Bulk { ids, action })?;
        Ok(BulkOutcome { updated_count: event.affected() })
    }

    async fn delete_completed(&self, owner: Uuid) -> RemoteResult<()> {
        self.check_owner(owner)?;
        self.handle(Command::DeleteCompleted)?;
        Ok(())
    }

    async fn undo_last_delete(&self) -> RemoteResult<Vec<Task>> {
        match self.handle(Command::UndoLastDelete)? {
            Event::TasksRestored { tasks, .. } => Ok(tasks),
            other => Err(unexpected(&other)),
        }
    }

    async fn update_shopping_item(&self, task_id: Uuid, item_id: Uuid, completed: bool) -> RemoteResult<Task> {
        single(self.handle(Command::SetShoppingItem { task_id, item_id, completed })?)
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::TITLE_MAX;

    const ALICE: Uuid = Uuid::from_u128(1);
    const BOB: Uuid = Uuid::from_u128(2);

    fn remote() -> LocalRemote {
        LocalRemote::new(World::new(), None, ALICE)
    }

    #[tokio::test]
    async fn create_then_list() {
        let remote = remote();
        let task = remote.create(ALICE, NewTask::titled("Buy milk")).await.unwrap();
        assert_eq!(task.user_id, ALICE);

        let list = remote.list(ALICE).await.unwrap();
        assert_eq!(list, vec![task]);
        assert_eq!(remote.revision(), 1);
    }

    #[tokio::test]
    async fn rejections_carry_readable_messages() {
        let remote = remote();
        let err = remote.create(ALICE, NewTask::titled("")).await.unwrap_err();
        assert_eq!(err.message, "title must not be empty");

        let err = remote.toggle(Uuid::new_v4(), true).await.unwrap_err();
        assert_eq!(err.message, "task not found");

        assert!(remote.list(BOB).await.is_err());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let alice = remote();
        let bob = alice.as_user(BOB);
        let task = alice.create(ALICE, NewTask::titled("private")).await.unwrap();

        assert!(bob.list(BOB).await.unwrap().is_empty());
        let err = bob.delete(task.id).await.unwrap_err();
        assert_eq!(err, RemoteError::from(WorldError::NotOwner));
    }

    #[tokio::test]
    async fn delete_returns_record_and_undo_brings_it_back() {
        let remote = remote();
        let task = remote.create(ALICE, NewTask::titled("doomed")).await.unwrap();

        let deleted = remote.delete(task.id).await.unwrap();
        assert_eq!(deleted.task.id, task.id);
        assert!(remote.snapshot().is_empty());

        let restored = remote.undo_last_delete().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(remote.snapshot()[0].id, task.id);

        assert!(remote.undo_last_delete().await.is_err());
    }

    #[tokio::test]
    async fn bulk_reports_count() {
        let remote = remote();
        let a = remote.create(ALICE, NewTask::titled("a")).await.unwrap();
        let b = remote.create(ALICE, NewTask::titled("b")).await.unwrap();

        let outcome = remote.bulk(ALICE, vec![a.id, b.id], BulkAction::Complete).await.unwrap();
        assert_eq!(outcome.updated_count, 2);
        assert!(remote.snapshot().iter().all(|t| t.completed));
    }

    #[tokio::test]
    async fn commands_are_flushed_to_the_save_file() {
        let path = format!("/tmp/txxt_client_test_backend_{}.redb", std::process::id());
        let _ = std::fs::remove_file(&path);
        let save_file = SaveFile::open(&path).unwrap();

        let remote = LocalRemote::new(World::new(), Some(save_file.clone()), ALICE);
        let task = remote.create(ALICE, NewTask::titled("persisted")).await.unwrap();
        remote.toggle(task.id, true).await.unwrap();

        let world = save_file.load_world(TITLE_MAX).unwrap();
        assert!(world.tasks[&task.id].completed);
        assert_eq!(world.revision, 2);

        let _ = std::fs::remove_file(&path);
    }
}
