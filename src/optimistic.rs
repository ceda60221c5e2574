//! Optimistic update engine.
//!
//! Runs before the remote call is dispatched:
//!
//! 1. cancel any background fetch for the key, so a late response cannot
//!    overwrite what we are about to write;
//! 2. take the snapshot (absent = empty list);
//! 3. derive the caller's auxiliary context from that snapshot, while the
//!    record it describes still exists;
//! 4. project and write the result as a pending layer.
//!
//! The returned [`MutationContext`] is handed to exactly one of the success
//! or failure paths and then dropped.

use std::sync::Arc;

use crate::cache::{CacheStore, Projection, QueryKey};

/// `(input, previous list) -> projected list`.
pub type ProjectFn<T, I> = Arc<dyn Fn(&I, &[T]) -> Vec<T> + Send + Sync>;

/// `(input, previous list) -> auxiliary context`.
pub type ContextFn<T, I, A> = Arc<dyn Fn(&I, &[T]) -> A + Send + Sync>;

/// Everything one attempt remembers between dispatch and resolution.
#[derive(Debug)]
pub struct MutationContext<T, A> {
    pub key: QueryKey,
    /// List as it was before this attempt touched it.
    pub snapshot: Option<Arc<Vec<T>>>,
    /// Caller-declared fields derived from the snapshot.
    pub aux: A,
    layer: Option<u64>,
}

impl<T, A> MutationContext<T, A> {
    /// Whether this attempt wrote an optimistic projection.
    pub fn is_optimistic(&self) -> bool {
        self.layer.is_some()
    }

    /// The snapshot as a slice; empty when nothing was cached.
    pub fn previous(&self) -> &[T] {
        self.snapshot.as_deref().map(Vec::as_slice).unwrap_or(&[])
    }

    /// The same attempt without its auxiliary fields.
    pub fn bare(&self) -> MutationContext<T, ()> {
        MutationContext {
            key: self.key.clone(),
            snapshot: self.snapshot.clone(),
            aux: (),
            layer: self.layer,
        }
    }
}

/// Snapshot, derive context and (when a projection is given) apply it.
pub fn begin<T, I, A>(
    cache: &CacheStore<T>,
    key: &QueryKey,
    input: &I,
    project: Option<&ProjectFn<T, I>>,
    context: &ContextFn<T, I, A>,
) -> MutationContext<T, A>
where
    T: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
{
    cache.cancel_in_flight(key);

    let before = cache.read(key);
    let aux = context(input, before.as_deref().map(Vec::as_slice).unwrap_or(&[]));

    let Some(project) = project else {
        return MutationContext {
            key: key.clone(),
            snapshot: before,
            aux,
            layer: None,
        };
    };

    let layer: Projection<T> = {
        let project = Arc::clone(project);
        let input = input.clone();
        Arc::new(move |prev: &[T]| project(&input, prev))
    };
    let (attempt, snapshot) = cache.push_layer(key, layer);
    MutationContext {
        key: key.clone(),
        snapshot,
        aux,
        layer: Some(attempt),
    }
}

/// Success path: the optimistic layer has served its purpose.
pub fn settle<T, A>(cache: &CacheStore<T>, ctx: &MutationContext<T, A>)
where
    T: Clone + Send + Sync + 'static,
{
    if let Some(attempt) = ctx.layer {
        cache.settle_layer(&ctx.key, attempt);
    }
}

/// Failure path: put the snapshot back (newer layers are replayed
/// on top of it). A non-optimistic attempt changed nothing, so there is
/// nothing to restore.
pub fn rollback<T, A>(cache: &CacheStore<T>, ctx: &MutationContext<T, A>)
where
    T: Clone + Send + Sync + 'static,
{
    if let Some(attempt) = ctx.layer {
        cache.rollback_layer(&ctx.key, attempt);
    }
}

// ── Tests ──────────────────────────────────────────────────────
