//! The todo collection and its mutations for one signed-in owner.
//!
//! `TodoClient` wires the generic pieces together: one cache store keyed by
//! `("todos", owner)`, one outcome dispatcher, and a factory per mutation.
//! Mutations are cheap to build; a UI typically builds each once per
//! session and keeps it for its status flags.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CacheStore, Collection, Fetcher, QueryKey};
use crate::mutation::{Mutation, MutationError, PerformFn, Targets, ValidationError};
use crate::optimistic::{MutationContext, ProjectFn};
use crate::outcome::{Notifier, Outcomes, UndoCallback, UndoToken};
use crate::projections;
use crate::remote::{BulkAction, BulkOutcome, Deleted, RemoteApi, RemoteResult};
use crate::settings::Settings;
use crate::task::{NewTask, Task, TaskPatch};

pub const TODOS: &str = "todos";

// ── Session ────────────────────────────────────────────────────

/// Who is signed in. Without an owner there is no query key: reads yield
/// nothing and every mutation is inert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    pub owner: Option<Uuid>,
}

impl Session {
    pub fn signed_in(owner: Uuid) -> Self {
        Session { owner: Some(owner) }
    }

    pub fn signed_out() -> Self {
        Session { owner: None }
    }

    pub fn key(&self) -> Option<QueryKey> {
        self.owner.map(|owner| QueryKey::new(TODOS, owner))
    }
}

// ── Inputs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub id: Uuid,
    pub patch: TaskPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggle {
    pub id: Uuid,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRequest {
    pub ids: Vec<Uuid>,
    pub action: BulkAction,
}

impl Targets for BulkRequest {
    fn targets(&self) -> &[Uuid] {
        &self.ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShoppingToggle {
    pub task_id: Uuid,
    pub item_id: Uuid,
    pub completed: bool,
}

pub fn validate_title(title: &str, max: usize) -> Result<(), ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > max {
        return Err(ValidationError::TitleTooLong { max });
    }
    Ok(())
}

/// "1 todo" / "3 todos"
fn todos_count(n: usize) -> String {
    if n == 1 {
        "1 todo".to_string()
    } else {
        format!("{n} todos")
    }
}

fn title_of(list: &[Task], id: Uuid) -> Option<String> {
    list.iter().find(|t| t.id == id).map(|t| t.title.clone())
}

// ── Client ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TodoClient {
    session: Session,
    cache: CacheStore<Task>,
    outcomes: Outcomes,
    remote: Arc<dyn RemoteApi>,
    settings: Settings,
}

impl TodoClient {
    pub fn new(remote: Arc<dyn RemoteApi>, notifier: Arc<dyn Notifier>, settings: Settings, session: Session) -> Self {
        let fetcher: Fetcher<Task> = {
            let remote = Arc::clone(&remote);
            Arc::new(move |key: QueryKey| {
                let remote = Arc::clone(&remote);
                async move { remote.list(key.owner).await }.boxed()
            })
        };
        TodoClient {
            session,
            cache: CacheStore::new(fetcher, settings.stale_after()),
            outcomes: Outcomes::new(notifier, settings.undo_depth),
            remote,
            settings,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn key(&self) -> Option<QueryKey> {
        self.session.key()
    }

    pub fn cache(&self) -> &CacheStore<Task> {
        &self.cache
    }

    pub fn outcomes(&self) -> &Outcomes {
        &self.outcomes
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Reads ──────────────────────────────────────────────────

    /// The owner's collection; starts or refreshes a fetch as needed.
    pub fn todos(&self) -> Collection<Task> {
        match self.key() {
            Some(key) => self.cache.query(&key),
            None => Collection {
                items: Arc::new(Vec::new()),
                is_loading: false,
                is_stale: false,
                is_fetching: false,
                last_error: None,
            },
        }
    }

    pub async fn refetch(&self) -> RemoteResult<Arc<Vec<Task>>> {
        match self.key() {
            Some(key) => self.cache.refetch(&key).await,
            None => Ok(Arc::new(Vec::new())),
        }
    }

    pub async fn undo(&self, token: UndoToken) -> bool {
        self.outcomes.undo(token).await
    }

    pub async fn undo_latest(&self) -> bool {
        self.outcomes.undo_latest().await
    }

    // ── Mutations ──────────────────────────────────────────────

    fn owner(&self) -> Uuid {
        self.session.owner.unwrap_or_default()
    }

    fn perform<I, O, F, Fut>(&self, f: F) -> PerformFn<I, O>
    where
        I: 'static,
        O: 'static,
        F: Fn(Arc<dyn RemoteApi>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RemoteResult<O>> + Send + 'static,
    {
        let remote = Arc::clone(&self.remote);
        Arc::new(move |input: I| f(Arc::clone(&remote), input).boxed())
    }

    /// Simple: the new record shows up when the refetch lands.
    pub fn create(&self) -> Mutation<Task, NewTask, Task> {
        let owner = self.owner();
        let title_max = self.settings.title_max;
        let perform = self.perform(move |remote: Arc<dyn RemoteApi>, new: NewTask| async move {
            remote.create(owner, new).await
        });
        Mutation::simple(
            "create",
            self.cache.clone(),
            self.outcomes.clone(),
            self.key(),
            perform,
            "Todo created",
            "Failed to create todo",
        )
        .precondition(move |new: &NewTask| validate_title(&new.title, title_max))
        .build()
    }

    pub fn update(&self) -> Mutation<Task, Edit, Task, Option<String>> {
        let title_max = self.settings.title_max;
        let perform = self.perform(|remote: Arc<dyn RemoteApi>, edit: Edit| async move {
            remote.update(edit.id, edit.patch).await
        });
        let project: ProjectFn<Task, Edit> =
            Arc::new(|edit: &Edit, prev: &[Task]| projections::update(prev, edit.id, &edit.patch));
        Mutation::optimistic("update", self.cache.clone(), self.outcomes.clone(), self.key(), perform, project)
            .with_context(|edit: &Edit, prev: &[Task]| title_of(prev, edit.id))
            .precondition(move |edit: &Edit| {
                if edit.patch.is_empty() {
                    return Err(ValidationError::Invalid("nothing to change".into()));
                }
                match &edit.patch.title {
                    Some(title) => validate_title(title, title_max),
                    None => Ok(()),
                }
            })
            .success_with(|task: &Task, _edit: &Edit, ctx: &MutationContext<Task, Option<String>>| {
                match ctx.aux.as_deref() {
                    Some(old) if old != task.title => format!("\"{old}\" renamed to \"{}\"", task.title),
                    _ => format!("\"{}\" updated", task.title),
                }
            })
            .build()
    }

    pub fn toggle(&self) -> Mutation<Task, Toggle, Task, Option<String>> {
        let perform = self.perform(|remote: Arc<dyn RemoteApi>, t: Toggle| async move {
            remote.toggle(t.id, t.completed).await
        });
        let project: ProjectFn<Task, Toggle> =
            Arc::new(|t: &Toggle, prev: &[Task]| projections::toggle(prev, t.id, t.completed));
        Mutation::optimistic("toggle", self.cache.clone(), self.outcomes.clone(), self.key(), perform, project)
            .with_context(|t: &Toggle, prev: &[Task]| title_of(prev, t.id))
            .success_with(|task: &Task, t: &Toggle, ctx: &MutationContext<Task, Option<String>>| {
                let title = ctx.aux.as_deref().unwrap_or(&task.title);
                if t.completed {
                    format!("\"{title}\" marked as complete")
                } else {
                    format!("\"{title}\" marked as active")
                }
            })
            .build()
    }

    /// Undoable: the confirmation carries an undo control that restores
    /// the deleted record.
    pub fn delete(&self) -> Mutation<Task, Uuid, Deleted, Option<Task>> {
        let restore = self.restore();
        let perform = self.perform(|remote: Arc<dyn RemoteApi>, id: Uuid| async move { remote.delete(id).await });
        let project: ProjectFn<Task, Uuid> = Arc::new(|id: &Uuid, prev: &[Task]| projections::delete(prev, *id));
        Mutation::optimistic("delete", self.cache.clone(), self.outcomes.clone(), self.key(), perform, project)
            .with_context(|id: &Uuid, prev: &[Task]| prev.iter().find(|t| t.id == *id).cloned())
            .success_with(|deleted: &Deleted, _id: &Uuid, _ctx: &MutationContext<Task, Option<Task>>| {
                format!("\"{}\" deleted", deleted.task.title)
            })
            .undo_with(
                self.settings.undo_label.clone(),
                self.settings.undo_duration(),
                move |deleted: &Deleted, _id: &Uuid, ctx: &MutationContext<Task, Option<Task>>| {
                    // prefer the cached copy: it carries the order the user last saw
                    let record = ctx.aux.clone().unwrap_or_else(|| deleted.task.clone());
                    restore_action(restore.clone(), vec![record])
                },
            )
            .build()
    }

    /// Put back what the last delete removed. The records are re-inserted
    /// optimistically; the server's copy replaces them on refetch.
    pub fn restore(&self) -> Mutation<Task, Vec<Task>, Vec<Task>> {
        let perform = self.perform(|remote: Arc<dyn RemoteApi>, _records: Vec<Task>| async move {
            remote.undo_last_delete().await
        });
        let project: ProjectFn<Task, Vec<Task>> =
            Arc::new(|records: &Vec<Task>, prev: &[Task]| projections::restore(prev, records));
        Mutation::optimistic("restore", self.cache.clone(), self.outcomes.clone(), self.key(), perform, project)
            .success_with(|restored: &Vec<Task>, _records: &Vec<Task>, _ctx: &MutationContext<Task, ()>| {
                match restored.as_slice() {
                    [task] => format!("\"{}\" restored", task.title),
                    many => format!("{} restored", todos_count(many.len())),
                }
            })
            .build()
    }

    /// Drag-and-drop reorder. Confirms silently; failures still report.
    pub fn reorder(&self) -> Mutation<Task, Vec<Uuid>, ()> {
        let owner = self.owner();
        let perform = self.perform(move |remote: Arc<dyn RemoteApi>, ids: Vec<Uuid>| async move {
            remote.reorder(owner, ids).await
        });
        let project: ProjectFn<Task, Vec<Uuid>> =
            Arc::new(|ids: &Vec<Uuid>, prev: &[Task]| projections::reorder(prev, ids));
        Mutation::optimistic("reorder", self.cache.clone(), self.outcomes.clone(), self.key(), perform, project).build()
    }

    pub fn bulk(&self) -> Mutation<Task, BulkRequest, BulkOutcome> {
        let owner = self.owner();
        let perform = self.perform(move |remote: Arc<dyn RemoteApi>, req: BulkRequest| async move {
            remote.bulk(owner, req.ids, req.action).await
        });
        let project: ProjectFn<Task, BulkRequest> =
            Arc::new(|req: &BulkRequest, prev: &[Task]| projections::bulk(prev, &req.ids, req.action));
        let outcomes = self.outcomes.clone();
        Mutation::bulk(
            "bulk",
            self.cache.clone(),
            self.outcomes.clone(),
            self.key(),
            perform,
            project,
            |req: &BulkRequest| format!("{} {}", todos_count(req.ids.len()), req.action.verb()),
        )
        .on_resolved(move |_: &BulkOutcome, req: &BulkRequest, _: &MutationContext<Task, ()>| {
            if req.action == BulkAction::Delete {
                supersede_undo(&outcomes);
            }
        })
        .build()
    }

    pub fn delete_completed(&self) -> Mutation<Task, (), (), usize> {
        let owner = self.owner();
        let perform = self.perform(move |remote: Arc<dyn RemoteApi>, _: ()| async move {
            remote.delete_completed(owner).await
        });
        let project: ProjectFn<Task, ()> = Arc::new(|_: &(), prev: &[Task]| projections::delete_completed(prev));
        let outcomes = self.outcomes.clone();
        Mutation::optimistic("delete_completed", self.cache.clone(), outcomes.clone(), self.key(), perform, project)
            .with_context(|_: &(), prev: &[Task]| prev.iter().filter(|t| t.completed).count())
            .on_resolved(move |_: &(), _: &(), ctx: &MutationContext<Task, usize>| {
                if ctx.aux > 0 {
                    supersede_undo(&outcomes);
                }
            })
            .success_with(|_: &(), _: &(), ctx: &MutationContext<Task, usize>| {
                let noun = if ctx.aux == 1 { "todo" } else { "todos" };
                format!("Cleared {} completed {noun}", ctx.aux)
            })
            .build()
    }

    /// Check or uncheck one shopping item; the parent's `completed` follows.
    pub fn toggle_shopping_item(&self) -> Mutation<Task, ShoppingToggle, Task> {
        let perform = self.perform(|remote: Arc<dyn RemoteApi>, s: ShoppingToggle| async move {
            remote.update_shopping_item(s.task_id, s.item_id, s.completed).await
        });
        let project: ProjectFn<Task, ShoppingToggle> = Arc::new(|s: &ShoppingToggle, prev: &[Task]| {
            projections::shopping_item(prev, s.task_id, s.item_id, s.completed)
        });
        Mutation::optimistic("shopping_item", self.cache.clone(), self.outcomes.clone(), self.key(), perform, project)
            .build()
    }
}

/// A deletion without its own undo just put a newer batch on top of the
/// server's trash; older delete offers would restore that batch instead.
fn supersede_undo(outcomes: &Outcomes) {
    if outcomes.pending_undos() > 0 {
        debug!(pending = outcomes.pending_undos(), "undo superseded by a newer deletion");
        outcomes.clear_undo();
    }
}

fn restore_action(restore: Mutation<Task, Vec<Task>, Vec<Task>>, records: Vec<Task>) -> UndoCallback {
    Arc::new(move || {
        let restore = restore.clone();
        let records = records.clone();
        async move {
            if let Err(e) = restore.invoke_async(records).await {
                // already reported through the dispatcher
                debug!(error = %e, "undo did not go through");
            }
        }
        .boxed()
    })
}

impl std::fmt::Debug for TodoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TodoClient").field("session", &self.session).finish_non_exhaustive()
    }
}

/// Surface a mutation's synchronous rejection the way a form would.
pub fn field_message(error: &MutationError) -> Option<String> {
    match error {
        MutationError::Validation(e) => Some(e.to_string()),
        _ => None,
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalRemote;
    use crate::outcome::{Level, NotificationLog, NOTHING_TO_UNDO};
    use crate::remote::RemoteError;
    use crate::task::{ShoppingItem, TaskKind};
    use crate::world::World;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    const OWNER: Uuid = Uuid::from_u128(7);

    /// What the next mutating call does before reaching the backend.
    #[derive(Default)]
    struct Step {
        gate: Option<Arc<Notify>>,
        fail: Option<&'static str>,
    }

    /// `LocalRemote` with a script in front of every mutating call.
    struct Scripted {
        inner: LocalRemote,
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Scripted {
        fn new() -> Self {
            Scripted {
                inner: LocalRemote::new(World::new(), None, OWNER),
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn fail_next(&self, message: &'static str) {
            self.script.lock().unwrap().push_back(Step { gate: None, fail: Some(message) });
        }

        /// Hold the next call until the returned gate is notified.
        fn gate_next(&self, fail: Option<&'static str>) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.script.lock().unwrap().push_back(Step { gate: Some(Arc::clone(&gate)), fail });
            gate
        }

        fn pass_next(&self) {
            self.script.lock().unwrap().push_back(Step::default());
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        async fn enter(&self, name: &'static str) -> RemoteResult<()> {
            self.calls.lock().unwrap().push(name);
            let step = self.script.lock().unwrap().pop_front().unwrap_or_default();
            if let Some(gate) = step.gate {
                gate.notified().await;
            }
            match step.fail {
                Some(message) => Err(RemoteError::new(message)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl RemoteApi for Scripted {
        async fn list(&self, owner: Uuid) -> RemoteResult<Vec<Task>> {
            self.inner.list(owner).await
        }

        async fn create(&self, owner: Uuid, new: NewTask) -> RemoteResult<Task> {
            self.enter("create").await?;
            self.inner.create(owner, new).await
        }

        async fn update(&self, id: Uuid, patch: TaskPatch) -> RemoteResult<Task> {
            self.enter("update").await?;
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: Uuid) -> RemoteResult<Deleted> {
            self.enter("delete").await?;
            self.inner.delete(id).await
        }

        async fn toggle(&self, id: Uuid, completed: bool) -> RemoteResult<Task> {
            self.enter("toggle").await?;
            self.inner.toggle(id, completed).await
        }

        async fn reorder(&self, owner: Uuid, ids: Vec<Uuid>) -> RemoteResult<()> {
            self.enter("reorder").await?;
            self.inner.reorder(owner, ids).await
        }

        async fn bulk(&self, owner: Uuid, ids: Vec<Uuid>, action: BulkAction) -> RemoteResult<BulkOutcome> {
            self.enter("bulk").await?;
            self.inner.bulk(owner, ids, action).await
        }

        async fn delete_completed(&self, owner: Uuid) -> RemoteResult<()> {
            self.enter("delete_completed").await?;
            self.inner.delete_completed(owner).await
        }

        async fn undo_last_delete(&self) -> RemoteResult<Vec<Task>> {
            self.enter("undo_last_delete").await?;
            self.inner.undo_last_delete().await
        }

        async fn update_shopping_item(&self, task_id: Uuid, item_id: Uuid, completed: bool) -> RemoteResult<Task> {
            self.enter("update_shopping_item").await?;
            self.inner.update_shopping_item(task_id, item_id, completed).await
        }
    }

    struct Fixture {
        client: TodoClient,
        remote: Arc<Scripted>,
        log: NotificationLog,
        ids: Vec<Uuid>,
    }

    impl Fixture {
        fn key(&self) -> QueryKey {
            self.client.key().unwrap()
        }

        fn cached(&self) -> Vec<Task> {
            self.client.cache().read(&self.key()).map(|l| l.to_vec()).unwrap_or_default()
        }

        fn cached_task(&self, id: Uuid) -> Option<Task> {
            self.cached().into_iter().find(|t| t.id == id)
        }
    }

    /// Server seeded with `titles`, client signed in and primed.
    async fn fixture(titles: &[&str]) -> Fixture {
        let remote = Arc::new(Scripted::new());
        let mut ids = Vec::new();
        for title in titles {
            ids.push(remote.inner.create(OWNER, NewTask::titled(*title)).await.unwrap().id);
        }
        let log = NotificationLog::default();
        let client = TodoClient::new(
            Arc::clone(&remote) as Arc<dyn RemoteApi>,
            Arc::new(log.clone()),
            Settings::default(),
            Session::signed_in(OWNER),
        );
        client.refetch().await.unwrap();
        Fixture { client, remote, log, ids }
    }

    #[tokio::test]
    async fn toggle_is_visible_before_the_server_answers() {
        let fx = fixture(&["X"]).await;
        let id = fx.ids[0];
        let gate = fx.remote.gate_next(None);

        let toggle = fx.client.toggle();
        let handle = toggle.invoke(Toggle { id, completed: true }).unwrap();
        assert!(fx.cached_task(id).unwrap().completed);
        assert!(toggle.is_pending());
        assert!(fx.log.is_empty());

        gate.notify_one();
        handle.await.unwrap().unwrap();
        assert!(toggle.is_success());

        let note = fx.log.last().unwrap();
        assert_eq!(note.level, Level::Success);
        assert!(note.text.contains("X"));
        assert!(fx.cached_task(id).unwrap().completed);

        fx.client.refetch().await.unwrap();
        assert!(fx.cached_task(id).unwrap().completed);
    }

    #[tokio::test]
    async fn failed_update_reverts_and_reports() {
        let fx = fixture(&["X"]).await;
        let id = fx.ids[0];
        let before = fx.cached();
        fx.remote.fail_next("network");

        let update = fx.client.update();
        let result = update.invoke_async(Edit { id, patch: TaskPatch::title("Y") }).await;

        assert_eq!(result, Err(MutationError::Remote(RemoteError::new("network"))));
        assert_eq!(fx.cached(), before);
        assert_eq!(fx.cached_task(id).unwrap().title, "X");
        assert!(update.is_error());

        let note = fx.log.last().unwrap();
        assert_eq!(note.level, Level::Error);
        assert!(note.text.contains("network"));
        assert_eq!(fx.log.len(), 1);
    }

    #[tokio::test]
    async fn reorder_projects_new_sequence() {
        let fx = fixture(&["one", "two", "three"]).await;
        let (one, two, three) = (fx.ids[0], fx.ids[1], fx.ids[2]);
        let gate = fx.remote.gate_next(None);

        let handle = fx.client.reorder().invoke(vec![three, one, two]).unwrap();
        let cached = fx.cached();
        assert_eq!(cached.iter().map(|t| t.id).collect::<Vec<_>>(), vec![three, one, two]);
        assert_eq!(cached.iter().map(|t| t.order).collect::<Vec<_>>(), vec![0, 1, 2]);

        gate.notify_one();
        handle.await.unwrap().unwrap();
        // reorder confirms silently
        assert!(fx.log.is_empty());

        let server: Vec<Uuid> = fx.client.refetch().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(server, vec![three, one, two]);
    }

    #[tokio::test]
    async fn bulk_complete_counts_in_confirmation() {
        let fx = fixture(&["a", "b", "c"]).await;
        let gate = fx.remote.gate_next(None);

        let handle = fx
            .client
            .bulk()
            .invoke(BulkRequest { ids: vec![fx.ids[0], fx.ids[1]], action: BulkAction::Complete })
            .unwrap();
        assert!(fx.cached_task(fx.ids[0]).unwrap().completed);
        assert!(fx.cached_task(fx.ids[1]).unwrap().completed);
        assert!(!fx.cached_task(fx.ids[2]).unwrap().completed);

        gate.notify_one();
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.updated_count, 2);
        assert_eq!(fx.log.last().unwrap().text, "2 todos completed");
    }

    #[tokio::test]
    async fn bulk_with_nothing_selected_is_rejected() {
        let fx = fixture(&["a"]).await;
        let result = fx
            .client
            .bulk()
            .invoke_async(BulkRequest { ids: Vec::new(), action: BulkAction::Delete })
            .await;
        assert_eq!(result, Err(MutationError::Validation(ValidationError::EmptySelection)));
        assert!(fx.remote.calls().is_empty());
        assert!(fx.log.is_empty());
    }

    #[tokio::test]
    async fn delete_offers_undo_that_restores() {
        let fx = fixture(&["keep", "doomed"]).await;
        let id = fx.ids[1];

        fx.client.delete().invoke_async(id).await.unwrap();
        assert!(fx.cached_task(id).is_none());

        let note = fx.log.last().unwrap();
        assert_eq!(note.text, "\"doomed\" deleted");
        let offer = note.undo.expect("undo offer");
        assert_eq!(offer.label, "Undo");

        assert!(fx.client.undo(offer.token).await);
        assert!(fx.remote.calls().contains(&"undo_last_delete"));
        assert!(fx.cached_task(id).is_some());
        assert_eq!(fx.log.last().unwrap().text, "\"doomed\" restored");

        let server = fx.client.refetch().await.unwrap();
        assert_eq!(server.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(), vec!["keep", "doomed"]);
    }

    #[tokio::test]
    async fn superseded_undo_reports_nothing_to_undo() {
        let fx = fixture(&["a", "b"]).await;
        let delete = fx.client.delete();
        delete.invoke_async(fx.ids[0]).await.unwrap();
        let first = fx.log.last().unwrap().undo.unwrap();
        delete.invoke_async(fx.ids[1]).await.unwrap();

        assert!(!fx.client.undo(first.token).await);
        assert_eq!(fx.log.last().unwrap().text, NOTHING_TO_UNDO);
        assert!(fx.cached_task(fx.ids[0]).is_none());
        assert!(!fx.remote.calls().contains(&"undo_last_delete"));
    }

    #[tokio::test]
    async fn bulk_delete_supersedes_pending_undo() {
        let fx = fixture(&["a", "b", "c"]).await;
        let (a, b) = (fx.ids[0], fx.ids[1]);
        fx.client.delete().invoke_async(a).await.unwrap();
        let offer = fx.log.last().unwrap().undo.unwrap();

        fx.client
            .bulk()
            .invoke_async(BulkRequest { ids: vec![b], action: BulkAction::Delete })
            .await
            .unwrap();
        assert_eq!(fx.client.outcomes().pending_undos(), 0);

        // the server's newest trash batch is b now; restoring it under a's offer is wrong
        assert!(!fx.client.undo(offer.token).await);
        assert_eq!(fx.log.last().unwrap().text, NOTHING_TO_UNDO);
        assert!(!fx.remote.calls().contains(&"undo_last_delete"));

        let server: Vec<Uuid> = fx.client.refetch().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(server, vec![fx.ids[2]]);
    }

    #[tokio::test]
    async fn delete_completed_supersedes_pending_undo() {
        let fx = fixture(&["a", "b"]).await;
        fx.client.toggle().invoke_async(Toggle { id: fx.ids[1], completed: true }).await.unwrap();
        fx.client.delete().invoke_async(fx.ids[0]).await.unwrap();
        assert_eq!(fx.client.outcomes().pending_undos(), 1);

        fx.client.delete_completed().invoke_async(()).await.unwrap();
        assert_eq!(fx.client.outcomes().pending_undos(), 0);
        assert!(!fx.client.undo_latest().await);
        assert!(!fx.remote.calls().contains(&"undo_last_delete"));
    }

    #[tokio::test]
    async fn non_deleting_bulk_keeps_pending_undo() {
        let fx = fixture(&["a", "b"]).await;
        fx.client.delete().invoke_async(fx.ids[0]).await.unwrap();
        fx.client
            .bulk()
            .invoke_async(BulkRequest { ids: vec![fx.ids[1]], action: BulkAction::Complete })
            .await
            .unwrap();
        assert_eq!(fx.client.outcomes().pending_undos(), 1);
    }

    #[tokio::test]
    async fn abandoned_toggle_reverts_and_reports() {
        let fx = fixture(&["a"]).await;
        let id = fx.ids[0];
        let _gate = fx.remote.gate_next(None);

        let toggle = fx.client.toggle();
        let attempt = toggle.invoke_async(Toggle { id, completed: true });
        assert!(tokio::time::timeout(Duration::from_millis(10), attempt).await.is_err());

        assert!(!fx.cached_task(id).unwrap().completed);
        assert_eq!(fx.client.cache().pending_layers(&fx.key()), 0);
        assert!(toggle.is_error());
        let note = fx.log.last().unwrap();
        assert_eq!(note.level, Level::Error);
        assert!(note.text.contains(crate::mutation::ABANDONED));
    }

    #[tokio::test]
    async fn failed_undo_rolls_back_restore() {
        let fx = fixture(&["keep", "doomed"]).await;
        let id = fx.ids[1];
        fx.client.delete().invoke_async(id).await.unwrap();
        let offer = fx.log.last().unwrap().undo.unwrap();
        fx.remote.fail_next("offline");

        assert!(fx.client.undo(offer.token).await);
        assert!(fx.cached_task(id).is_none());
        assert_eq!(fx.client.cache().pending_layers(&fx.key()), 0);
        let note = fx.log.last().unwrap();
        assert_eq!(note.level, Level::Error);
        assert!(note.text.contains("offline"));
    }

    #[tokio::test]
    async fn failed_toggle_restores_snapshot_exactly() {
        let fx = fixture(&["a", "b"]).await;
        let before = fx.cached();
        fx.remote.fail_next("boom");

        let result = fx.client.toggle().invoke_async(Toggle { id: fx.ids[0], completed: true }).await;
        assert!(result.is_err());
        assert_eq!(fx.cached(), before);
        assert_eq!(fx.client.cache().pending_layers(&fx.key()), 0);
    }

    #[tokio::test]
    async fn earlier_failure_keeps_later_optimistic_write() {
        let fx = fixture(&["a", "b"]).await;
        let (a, b) = (fx.ids[0], fx.ids[1]);
        let gate = fx.remote.gate_next(Some("boom"));
        fx.remote.pass_next();

        let toggle = fx.client.toggle();
        let first = toggle.invoke(Toggle { id: a, completed: true }).unwrap();
        let second = toggle.invoke(Toggle { id: b, completed: true }).unwrap();
        assert!(fx.cached_task(a).unwrap().completed);
        assert!(fx.cached_task(b).unwrap().completed);

        second.await.unwrap().unwrap();
        gate.notify_one();
        assert!(first.await.unwrap().is_err());

        assert!(!fx.cached_task(a).unwrap().completed);
        assert!(fx.cached_task(b).unwrap().completed);
        // flags follow the latest attempt, which succeeded
        assert!(toggle.is_success());
    }

    #[tokio::test]
    async fn create_validates_then_waits_for_refetch() {
        let fx = fixture(&[]).await;
        let create = fx.client.create();

        let rejected = create.invoke_async(NewTask::titled("   ")).await;
        assert_eq!(rejected, Err(MutationError::Validation(ValidationError::EmptyTitle)));
        assert_eq!(field_message(&rejected.unwrap_err()).as_deref(), Some("title must not be empty"));
        assert!(fx.remote.calls().is_empty());

        let task = create.invoke_async(NewTask::titled("Fresh")).await.unwrap();
        assert!(fx.cached_task(task.id).is_none());
        assert!(fx.client.todos().is_stale);
        assert_eq!(fx.log.last().unwrap().text, "Todo created");

        fx.client.refetch().await.unwrap();
        assert!(fx.cached_task(task.id).is_some());
    }

    #[tokio::test]
    async fn create_failure_uses_fixed_text() {
        let fx = fixture(&[]).await;
        fx.remote.fail_next("offline");
        assert!(fx.client.create().invoke_async(NewTask::titled("x")).await.is_err());
        assert_eq!(fx.log.last().unwrap().text, "Failed to create todo");
    }

    #[tokio::test]
    async fn delete_completed_reports_count() {
        let fx = fixture(&["a", "b", "c"]).await;
        fx.client
            .bulk()
            .invoke_async(BulkRequest { ids: vec![fx.ids[0], fx.ids[2]], action: BulkAction::Complete })
            .await
            .unwrap();
        fx.client.refetch().await.unwrap();

        fx.client.delete_completed().invoke_async(()).await.unwrap();
        assert_eq!(fx.cached().iter().map(|t| t.id).collect::<Vec<_>>(), vec![fx.ids[1]]);
        assert_eq!(fx.log.last().unwrap().text, "Cleared 2 completed todos");
    }

    #[tokio::test]
    async fn shopping_items_drive_parent() {
        let fx = fixture(&[]).await;
        let new = NewTask {
            title: "Groceries".into(),
            shopping_items: vec!["milk".into(), "eggs".into()],
            ..Default::default()
        };
        let parent = fx.remote.inner.create(OWNER, new).await.unwrap();
        fx.client.refetch().await.unwrap();
        let items: Vec<Uuid> = parent.shopping_items().iter().map(|i| i.id).collect();

        let toggle = fx.client.toggle_shopping_item();
        for item in &items {
            toggle
                .invoke_async(ShoppingToggle { task_id: parent.id, item_id: *item, completed: true })
                .await
                .unwrap();
        }
        assert!(fx.cached_task(parent.id).unwrap().completed);

        let gate = fx.remote.gate_next(None);
        let handle = toggle
            .invoke(ShoppingToggle { task_id: parent.id, item_id: items[0], completed: false })
            .unwrap();
        let cached = fx.cached_task(parent.id).unwrap();
        assert!(!cached.completed);
        assert_eq!(
            cached.kind,
            TaskKind::Shopping(vec![
                ShoppingItem { id: items[0], text: "milk".into(), completed: false },
                ShoppingItem { id: items[1], text: "eggs".into(), completed: true },
            ])
        );
        gate.notify_one();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn signed_out_client_is_inert() {
        let remote = Arc::new(Scripted::new());
        let log = NotificationLog::default();
        let client = TodoClient::new(
            Arc::clone(&remote) as Arc<dyn RemoteApi>,
            Arc::new(log.clone()),
            Settings::default(),
            Session::signed_out(),
        );

        let view = client.todos();
        assert!(view.items.is_empty());
        assert!(!view.is_loading);
        assert!(client.refetch().await.unwrap().is_empty());

        assert_eq!(client.create().invoke_async(NewTask::titled("x")).await, Err(MutationError::NoSession));
        assert_eq!(
            client.toggle().invoke(Toggle { id: Uuid::new_v4(), completed: true }).err(),
            Some(MutationError::NoSession)
        );
        assert!(remote.calls().is_empty());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn first_read_loads_in_background() {
        let remote = Arc::new(Scripted::new());
        remote.inner.create(OWNER, NewTask::titled("hello")).await.unwrap();
        let client = TodoClient::new(
            Arc::clone(&remote) as Arc<dyn RemoteApi>,
            Arc::new(NotificationLog::default()),
            Settings::default(),
            Session::signed_in(OWNER),
        );

        let view = client.todos();
        assert!(view.is_loading);
        assert!(view.items.is_empty());

        // let the spawned fetch run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let view = client.todos();
        assert!(!view.is_loading);
        assert_eq!(view.items[0].title, "hello");
    }
}
