//! Keyed collection cache.
//!
//! One entry per [`QueryKey`]: the last materialized list, its staleness,
//! the background fetch in flight (if any), and the optimistic layers that
//! are still waiting for their remote call to resolve.
//!
//! Reads are served from whatever is cached while a refresh runs
//! (stale-while-revalidate). Every fetch carries the entry's generation at
//! spawn time; a response whose generation was superseded is dropped, so a
//! late read can never overwrite a newer optimistic write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::remote::{RemoteError, RemoteResult};

/// Identity of one cached collection: what it holds and who owns it.
/// Two owners never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub collection: &'static str,
    pub owner: Uuid,
}

impl QueryKey {
    pub fn new(collection: &'static str, owner: Uuid) -> Self {
        QueryKey { collection, owner }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.owner)
    }
}

/// Loads the authoritative list for a key.
pub type Fetcher<T> = Arc<dyn Fn(QueryKey) -> BoxFuture<'static, RemoteResult<Vec<T>>> + Send + Sync>;

/// Pure function from the previous list to the projected one.
pub type Projection<T> = Arc<dyn Fn(&[T]) -> Vec<T> + Send + Sync>;

/// What a reader sees for one key.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    pub items: Arc<Vec<T>>,
    /// No data yet and a fetch is running.
    pub is_loading: bool,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub last_error: Option<RemoteError>,
}

/// An optimistic write that the server has not reflected back yet.
struct Layer<T> {
    attempt: u64,
    /// List the layer was applied on top of (`None` = nothing was cached).
    snapshot: Option<Arc<Vec<T>>>,
    project: Projection<T>,
    /// Remote call succeeded. Kept only while an older layer is still
    /// pending, so rolling that one back can replay this effect.
    settled: bool,
}

struct Entry<T> {
    data: Option<Arc<Vec<T>>>,
    fetched_at: Option<Instant>,
    stale: bool,
    generation: u64,
    in_flight: Option<JoinHandle<()>>,
    layers: Vec<Layer<T>>,
    last_error: Option<RemoteError>,
}

impl<T> Entry<T> {
    /// Drop settled layers that no pending layer precedes; their effect is
    /// already part of `data` and nothing can rewind past them.
    fn prune_settled(&mut self) {
        let keep_from = self.layers.iter().position(|l| !l.settled).unwrap_or(self.layers.len());
        self.layers.drain(..keep_from);
    }

    fn empty() -> Self {
        Entry {
            data: None,
            fetched_at: None,
            stale: false,
            generation: 0,
            in_flight: None,
            layers: Vec::new(),
            last_error: None,
        }
    }

    fn abort_in_flight(&mut self) -> bool {
        self.generation += 1;
        match self.in_flight.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

struct Shared<T> {
    entries: Mutex<HashMap<QueryKey, Entry<T>>>,
    fetcher: Fetcher<T>,
    stale_after: Duration,
    attempts: AtomicU64,
}

/// The one shared mutable resource of the client. Cheap to clone; clones
/// share the same entries.
pub struct CacheStore<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CacheStore<T> {
    fn clone(&self) -> Self {
        CacheStore { shared: Arc::clone(&self.shared) }
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Fetcher<T>, stale_after: Duration) -> Self {
        CacheStore {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                fetcher,
                stale_after,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry<T>>> {
        self.shared.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Plain reads and writes ─────────────────────────────────

    /// Current list for `key`, or `None` if nothing has been cached.
    pub fn read(&self, key: &QueryKey) -> Option<Arc<Vec<T>>> {
        self.entries().get(key).and_then(|e| e.data.clone())
    }

    /// Replace the cached list in one step.
    pub fn write(&self, key: &QueryKey, list: Vec<T>) {
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
        entry.data = Some(Arc::new(list));
    }

    /// Snapshot of everything a reader needs for `key`. No side effects.
    pub fn collection(&self, key: &QueryKey) -> Collection<T> {
        let entries = self.entries();
        match entries.get(key) {
            Some(entry) => self.view(entry),
            None => Collection {
                items: Arc::new(Vec::new()),
                is_loading: false,
                is_stale: false,
                is_fetching: false,
                last_error: None,
            },
        }
    }

    /// Read request from the UI. The first read for a key creates the entry
    /// and starts a fetch; later reads revalidate in the background when the
    /// data has gone stale.
    pub fn query(&self, key: &QueryKey) -> Collection<T> {
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
        let needs_fetch = entry.in_flight.is_none() && (entry.data.is_none() || self.is_stale(entry));
        if needs_fetch {
            self.spawn_fetch(key, entry);
        }
        self.view(entry)
    }

    fn view(&self, entry: &Entry<T>) -> Collection<T> {
        let is_fetching = entry.in_flight.is_some();
        Collection {
            items: entry.data.clone().unwrap_or_default(),
            is_loading: entry.data.is_none() && is_fetching,
            is_stale: self.is_stale(entry),
            is_fetching,
            last_error: entry.last_error.clone(),
        }
    }

    fn is_stale(&self, entry: &Entry<T>) -> bool {
        entry.stale
            || entry
                .fetched_at
                .map(|at| at.elapsed() >= self.shared.stale_after)
                .unwrap_or(false)
    }

    // ── Staleness and fetching ─────────────────────────────────

    /// Mark `key` stale and schedule a background refetch. The stale list
    /// stays readable until the refetch lands.
    pub fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
        entry.stale = true;
        debug!(%key, "invalidated");
        self.spawn_fetch(key, entry);
    }

    /// Abort any fetch running for `key`. Returns whether one was running.
    pub fn cancel_in_flight(&self, key: &QueryKey) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(key) {
            Some(entry) => {
                let cancelled = entry.abort_in_flight();
                if cancelled {
                    debug!(%key, "cancelled in-flight fetch");
                }
                cancelled
            }
            None => false,
        }
    }

    /// Fetch `key` now and wait for it. Supersedes any background fetch.
    pub async fn refetch(&self, key: &QueryKey) -> RemoteResult<Arc<Vec<T>>> {
        let generation = {
            let mut entries = self.entries();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
            entry.abort_in_flight();
            entry.generation
        };
        let result = (self.shared.fetcher)(key.clone()).await;
        self.commit_fetch(key, generation, result.clone());
        result.map(|_| self.read(key).unwrap_or_default())
    }

    fn spawn_fetch(&self, key: &QueryKey, entry: &mut Entry<T>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(%key, "no runtime, fetch deferred until next read");
            return;
        };
        entry.abort_in_flight();
        let generation = entry.generation;
        let fetch = (self.shared.fetcher)(key.clone());
        let store = self.clone();
        let key = key.clone();
        entry.in_flight = Some(runtime.spawn(async move {
            let result = fetch.await;
            store.commit_fetch(&key, generation, result);
        }));
    }

    /// Land a fetch response. Pending optimistic layers are re-applied on
    /// top of the fresh list so their effect survives until they resolve.
    fn commit_fetch(&self, key: &QueryKey, generation: u64, result: RemoteResult<Vec<T>>) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            warn!(%key, generation, current = entry.generation, "dropping superseded fetch response");
            return;
        }
        entry.in_flight = None;
        match result {
            Ok(list) => {
                // the server already reflects settled writes
                entry.layers.retain(|l| !l.settled);
                let mut current = Some(Arc::new(list));
                for layer in entry.layers.iter_mut() {
                    layer.snapshot = current.clone();
                    let base = current.as_deref().map(Vec::as_slice).unwrap_or(&[]);
                    current = Some(Arc::new((layer.project)(base)));
                }
                entry.data = current;
                entry.stale = false;
                entry.fetched_at = Some(Instant::now());
                entry.last_error = None;
                debug!(%key, pending = entry.layers.len(), "fetch landed");
            }
            Err(e) => {
                warn!(%key, error = %e, "fetch failed");
                entry.last_error = Some(e);
            }
        }
    }

    // ── Optimistic layers ──────────────────────────────────────

    /// Project the current list and write the result as a pending layer.
    /// Returns the attempt id and the list the projection started from.
    pub fn push_layer(&self, key: &QueryKey, project: Projection<T>) -> (u64, Option<Arc<Vec<T>>>) {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
        let snapshot = entry.data.clone();
        let base = snapshot.as_deref().map(Vec::as_slice).unwrap_or(&[]);
        entry.data = Some(Arc::new(project(base)));
        entry.layers.push(Layer {
            attempt,
            snapshot: snapshot.clone(),
            project,
            settled: false,
        });
        debug!(%key, attempt, pending = entry.layers.len(), "optimistic layer applied");
        (attempt, snapshot)
    }

    /// Mark a layer whose remote call succeeded. The cached list is left
    /// as is; reconciliation is the refetch's job.
    pub fn settle_layer(&self, key: &QueryKey, attempt: u64) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            if let Some(layer) = entry.layers.iter_mut().find(|l| l.attempt == attempt) {
                layer.settled = true;
            }
            entry.prune_settled();
        }
    }

    /// Undo a failed layer.
    ///
    /// The list is reset to the layer's snapshot (verbatim, including
    /// "nothing cached"), then every newer layer, pending or settled, is
    /// re-applied on top of it in order.
    pub fn rollback_layer(&self, key: &QueryKey, attempt: u64) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        let Some(index) = entry.layers.iter().position(|l| l.attempt == attempt) else {
            warn!(%key, attempt, "rollback for unknown layer");
            return;
        };
        let failed = entry.layers.remove(index);
        let mut current = failed.snapshot;
        for layer in entry.layers[index..].iter_mut() {
            layer.snapshot = current.clone();
            let base = current.as_deref().map(Vec::as_slice).unwrap_or(&[]);
            current = Some(Arc::new((layer.project)(base)));
        }
        let replayed = entry.layers.len() - index;
        entry.data = current;
        entry.prune_settled();
        debug!(%key, attempt, replayed, "rolled back optimistic layer");
    }

    /// Number of optimistic layers still waiting on their remote call.
    pub fn pending_layers(&self, key: &QueryKey) -> usize {
        self.entries()
            .get(key)
            .map(|e| e.layers.iter().filter(|l| !l.settled).count())
            .unwrap_or(0)
    }
}

// ── Tests ──────────────────────────────────────────────────────
