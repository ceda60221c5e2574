//! Mutation instances and the four variant factories.
//!
//! A [`Mutation`] is built once (per owner) and invoked many times. Every
//! invocation is an independent attempt:
//!
//! ```text
//! precondition ─▶ snapshot + project (sync) ─▶ remote call ─▶ resolved | failed
//! ```
//!
//! The precondition and the optimistic write happen synchronously inside
//! `invoke`/`invoke_async` before the remote call is dispatched, so the UI
//! reflects the change before any round trip completes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, QueryKey};
use crate::executor::{Attempt, MutationStatus};
use crate::optimistic::{self, ContextFn, MutationContext, ProjectFn};
use crate::outcome::{ErrorNotice, Outcomes, SuccessNotice, UndoCallback};
use crate::remote::{RemoteError, RemoteResult};

// ── Errors ─────────────────────────────────────────────────────

/// Input rejected before dispatch. The remote is never called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyTitle,
    TitleTooLong { max: usize },
    EmptySelection,
    Invalid(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "title must not be empty"),
            ValidationError::TitleTooLong { max } => write!(f, "title must be at most {max} characters"),
            ValidationError::EmptySelection => write!(f, "nothing selected"),
            ValidationError::Invalid(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// No signed-in owner: the mutation is inert.
    NoSession,
    /// `invoke` was called outside a Tokio runtime; nothing was applied.
    NoRuntime,
    Validation(ValidationError),
    /// The remote call failed. Rollback and notification already happened.
    Remote(RemoteError),
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationError::NoSession => write!(f, "no active session"),
            MutationError::NoRuntime => write!(f, "no async runtime to run the mutation on"),
            MutationError::Validation(e) => write!(f, "{e}"),
            MutationError::Remote(e) => write!(f, "remote: {e}"),
        }
    }
}

impl std::error::Error for MutationError {}

impl From<ValidationError> for MutationError {
    fn from(e: ValidationError) -> Self {
        MutationError::Validation(e)
    }
}

// ── Configuration ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// No projection; the UI waits for reconciliation.
    Simple,
    /// Projection applied immediately, rolled back on failure.
    Optimistic,
    /// Optimistic, and the confirmation carries an undo control.
    Undoable,
    /// Optimistic over a set of target ids.
    Bulk,
}

/// Input of a bulk mutation.
pub trait Targets {
    fn targets(&self) -> &[Uuid];
}

pub type PerformFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, RemoteResult<O>> + Send + Sync>;
pub type PreconditionFn<I> = Arc<dyn Fn(&I) -> Result<(), ValidationError> + Send + Sync>;
pub type ResolvedFn<T, I, O, A> = Arc<dyn Fn(&O, &I, &MutationContext<T, A>) + Send + Sync>;
pub type FailedFn<T, I, A> = Arc<dyn Fn(&RemoteError, &I, &MutationContext<T, A>) + Send + Sync>;
pub type UndoFn<T, I, O, A> = Arc<dyn Fn(&O, &I, &MutationContext<T, A>) -> UndoCallback + Send + Sync>;

struct UndoSpec<T, I, O, A> {
    label: String,
    duration: Duration,
    action: UndoFn<T, I, O, A>,
}

struct Config<T, I, O, A> {
    name: &'static str,
    variant: Variant,
    key: Option<QueryKey>,
    perform: PerformFn<I, O>,
    precondition: Option<PreconditionFn<I>>,
    project: Option<ProjectFn<T, I>>,
    context: ContextFn<T, I, A>,
    on_resolved: Option<ResolvedFn<T, I, O, A>>,
    on_failed: Option<FailedFn<T, I, A>>,
    success: SuccessNotice<T, I, O, A>,
    error: ErrorNotice<I>,
    undo: Option<UndoSpec<T, I, O, A>>,
}

// ── Builder ────────────────────────────────────────────────────

/// Declares one mutation. Start from one of the variant constructors on
/// [`Mutation`]; hooks that read the auxiliary context go after
/// `with_context`.
pub struct MutationBuilder<T, I, O, A> {
    cache: CacheStore<T>,
    outcomes: Outcomes,
    config: Config<T, I, O, A>,
}

impl<T, I, O> MutationBuilder<T, I, O, ()>
where
    T: 'static,
    I: 'static,
    O: 'static,
{
    fn new(
        name: &'static str,
        variant: Variant,
        cache: CacheStore<T>,
        outcomes: Outcomes,
        key: Option<QueryKey>,
        perform: PerformFn<I, O>,
        project: Option<ProjectFn<T, I>>,
    ) -> Self {
        MutationBuilder {
            cache,
            outcomes,
            config: Config {
                name,
                variant,
                key,
                perform,
                precondition: None,
                project,
                context: Arc::new(|_: &I, _: &[T]| ()),
                on_resolved: None,
                on_failed: None,
                success: SuccessNotice::Silent,
                error: ErrorNotice::standard(),
                undo: None,
            },
        }
    }

    /// Declare auxiliary context derived from the pre-mutation list. Hooks
    /// declared before this keep running; they see the attempt without it.
    pub fn with_context<A, F>(self, f: F) -> MutationBuilder<T, I, O, A>
    where
        A: 'static,
        F: Fn(&I, &[T]) -> A + Send + Sync + 'static,
    {
        let Config {
            name,
            variant,
            key,
            perform,
            precondition,
            project,
            success,
            error,
            on_resolved,
            on_failed,
            undo,
            ..
        } = self.config;
        let success: SuccessNotice<T, I, O, A> = match success {
            SuccessNotice::Silent => SuccessNotice::Silent,
            SuccessNotice::Fixed(text) => SuccessNotice::Fixed(text),
            SuccessNotice::Computed(render) => {
                SuccessNotice::Computed(Arc::new(move |output: &O, input: &I, ctx: &MutationContext<T, A>| {
                    render(output, input, &ctx.bare())
                }))
            }
        };
        let on_resolved = on_resolved.map(|hook| -> ResolvedFn<T, I, O, A> {
            Arc::new(move |output: &O, input: &I, ctx: &MutationContext<T, A>| hook(output, input, &ctx.bare()))
        });
        let on_failed = on_failed.map(|hook| -> FailedFn<T, I, A> {
            Arc::new(move |error: &RemoteError, input: &I, ctx: &MutationContext<T, A>| hook(error, input, &ctx.bare()))
        });
        let undo = undo.map(|spec| {
            let build = spec.action;
            let action: UndoFn<T, I, O, A> =
                Arc::new(move |output: &O, input: &I, ctx: &MutationContext<T, A>| build(output, input, &ctx.bare()));
            UndoSpec {
                label: spec.label,
                duration: spec.duration,
                action,
            }
        });
        MutationBuilder {
            cache: self.cache,
            outcomes: self.outcomes,
            config: Config {
                name,
                variant,
                key,
                perform,
                precondition,
                project,
                context: Arc::new(f),
                on_resolved,
                on_failed,
                success,
                error,
                undo,
            },
        }
    }
}

impl<T, I, O, A> MutationBuilder<T, I, O, A> {
    /// Reject input before anything is dispatched.
    pub fn precondition<F>(mut self, f: F) -> Self
    where
        F: Fn(&I) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.config.precondition = Some(Arc::new(f));
        self
    }

    pub fn on_resolved<F>(mut self, f: F) -> Self
    where
        F: Fn(&O, &I, &MutationContext<T, A>) + Send + Sync + 'static,
    {
        self.config.on_resolved = Some(Arc::new(f));
        self
    }

    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&RemoteError, &I, &MutationContext<T, A>) + Send + Sync + 'static,
    {
        self.config.on_failed = Some(Arc::new(f));
        self
    }

    pub fn success(mut self, notice: SuccessNotice<T, I, O, A>) -> Self {
        self.config.success = notice;
        self
    }

    pub fn success_text(self, text: impl Into<String>) -> Self {
        self.success(SuccessNotice::Fixed(text.into()))
    }

    pub fn success_with<F>(self, f: F) -> Self
    where
        F: Fn(&O, &I, &MutationContext<T, A>) -> String + Send + Sync + 'static,
    {
        self.success(SuccessNotice::Computed(Arc::new(f)))
    }

    pub fn error(mut self, notice: ErrorNotice<I>) -> Self {
        self.config.error = notice;
        self
    }

    pub fn error_text(self, text: impl Into<String>) -> Self {
        self.error(ErrorNotice::Fixed(text.into()))
    }

    /// Attach an undo control to the confirmation. `action` builds the
    /// zero-argument reversal from the attempt's output, input and context.
    pub fn undo_with<F>(mut self, label: impl Into<String>, duration: Duration, action: F) -> Self
    where
        F: Fn(&O, &I, &MutationContext<T, A>) -> UndoCallback + Send + Sync + 'static,
    {
        self.config.variant = Variant::Undoable;
        self.config.undo = Some(UndoSpec {
            label: label.into(),
            duration,
            action: Arc::new(action),
        });
        self
    }

    pub fn build(self) -> Mutation<T, I, O, A> {
        debug_assert!(
            self.config.variant == Variant::Simple || self.config.project.is_some(),
            "{} mutations need a projection",
            self.config.name
        );
        Mutation {
            config: Arc::new(self.config),
            cache: self.cache,
            outcomes: self.outcomes,
            status: MutationStatus::default(),
        }
    }
}

// ── Mutation ───────────────────────────────────────────────────

/// One declared mutation. Cheap to clone; clones share status.
pub struct Mutation<T, I, O, A = ()> {
    config: Arc<Config<T, I, O, A>>,
    cache: CacheStore<T>,
    outcomes: Outcomes,
    status: MutationStatus,
}

impl<T, I, O, A> Clone for Mutation<T, I, O, A> {
    fn clone(&self) -> Self {
        Mutation {
            config: Arc::clone(&self.config),
            cache: self.cache.clone(),
            outcomes: self.outcomes.clone(),
            status: self.status.clone(),
        }
    }
}

/// Everything between the synchronous prelude and resolution.
struct Prepared<T, I, A> {
    input: I,
    ctx: MutationContext<T, A>,
    attempt: Attempt,
}

impl<T, I, O> Mutation<T, I, O, ()>
where
    T: 'static,
    I: 'static,
    O: 'static,
{
    /// No projection; fixed confirmation and error texts.
    pub fn simple(
        name: &'static str,
        cache: CacheStore<T>,
        outcomes: Outcomes,
        key: Option<QueryKey>,
        perform: PerformFn<I, O>,
        success: impl Into<String>,
        error: impl Into<String>,
    ) -> MutationBuilder<T, I, O, ()> {
        MutationBuilder::new(name, Variant::Simple, cache, outcomes, key, perform, None)
            .success_text(success)
            .error_text(error)
    }

    /// Projection applied before dispatch and rolled back on failure.
    pub fn optimistic(
        name: &'static str,
        cache: CacheStore<T>,
        outcomes: Outcomes,
        key: Option<QueryKey>,
        perform: PerformFn<I, O>,
        project: ProjectFn<T, I>,
    ) -> MutationBuilder<T, I, O, ()> {
        MutationBuilder::new(name, Variant::Optimistic, cache, outcomes, key, perform, Some(project))
    }

    /// Optimistic over `input.targets()`. An empty selection is rejected
    /// before dispatch; the confirmation is a function of the input only.
    pub fn bulk<F>(
        name: &'static str,
        cache: CacheStore<T>,
        outcomes: Outcomes,
        key: Option<QueryKey>,
        perform: PerformFn<I, O>,
        project: ProjectFn<T, I>,
        message: F,
    ) -> MutationBuilder<T, I, O, ()>
    where
        I: Targets,
        F: Fn(&I) -> String + Send + Sync + 'static,
    {
        MutationBuilder::new(name, Variant::Bulk, cache, outcomes, key, perform, Some(project))
            .precondition(|input: &I| {
                if input.targets().is_empty() {
                    Err(ValidationError::EmptySelection)
                } else {
                    Ok(())
                }
            })
            .success_with(move |_output: &O, input: &I, _ctx: &MutationContext<T, ()>| message(input))
    }
}

impl<T, I, O, A> Mutation<T, I, O, A>
where
    T: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    pub fn name(&self) -> &'static str {
        self.config.name
    }

    pub fn variant(&self) -> Variant {
        self.config.variant
    }

    pub fn key(&self) -> Option<&QueryKey> {
        self.config.key.as_ref()
    }

    pub fn status(&self) -> &MutationStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn last_error(&self) -> Option<RemoteError> {
        self.status.last_error()
    }

    /// Run one attempt and wait for it to resolve.
    pub async fn invoke_async(&self, input: I) -> Result<O, MutationError> {
        let prepared = self.prepare(input)?;
        self.finish(prepared).await
    }

    /// Fire-and-forget. The precondition and the optimistic write happen
    /// before this returns; the remote call and resolution run on a spawned
    /// task. Outside a Tokio runtime nothing is applied.
    pub fn invoke(&self, input: I) -> Result<JoinHandle<Result<O, MutationError>>, MutationError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(mutation = self.config.name, "no runtime, mutation not dispatched");
            return Err(MutationError::NoRuntime);
        };
        let prepared = self.prepare(input)?;
        let this = self.clone();
        Ok(runtime.spawn(async move { this.finish(prepared).await }))
    }

    fn prepare(&self, input: I) -> Result<Prepared<T, I, A>, MutationError> {
        let config = &self.config;
        let Some(key) = config.key.as_ref() else {
            debug!(mutation = config.name, "no session, mutation is inert");
            return Err(MutationError::NoSession);
        };
        if let Some(check) = &config.precondition {
            if let Err(e) = check(&input) {
                debug!(mutation = config.name, error = %e, "precondition failed, not dispatched");
                return Err(MutationError::Validation(e));
            }
        }
        let attempt = self.status.begin();
        let ctx = optimistic::begin(&self.cache, key, &input, config.project.as_ref(), &config.context);
        debug!(mutation = config.name, attempt = attempt.id(), optimistic = ctx.is_optimistic(), "dispatching");
        Ok(Prepared { input, ctx, attempt })
    }

    async fn finish(&self, prepared: Prepared<T, I, A>) -> Result<O, MutationError> {
        let call = (self.config.perform)(prepared.input.clone());
        let in_flight = InFlight {
            mutation: self,
            prepared: Some(prepared),
        };
        let result = call.await;
        in_flight.resolve(result)
    }

    fn resolve(&self, prepared: Prepared<T, I, A>, result: RemoteResult<O>) -> Result<O, MutationError> {
        let Prepared { input, ctx, attempt } = prepared;
        let config = &self.config;

        match result {
            Ok(output) => {
                if let Some(callback) = &config.on_resolved {
                    callback(&output, &input, &ctx);
                }
                let text = config.success.render(&output, &input, &ctx);
                let undo = config.undo.as_ref().map(|spec| {
                    let action = (spec.action)(&output, &input, &ctx);
                    let description = text.as_deref().unwrap_or(config.name);
                    self.outcomes.offer_undo(&spec.label, spec.duration, description, action)
                });
                self.outcomes.succeeded(&self.cache, &ctx, text, undo);
                attempt.succeed();
                Ok(output)
            }
            Err(error) => {
                let text = config.error.render(&error, &input);
                self.outcomes.failed(&self.cache, &ctx, &error, text);
                if let Some(callback) = &config.on_failed {
                    callback(&error, &input, &ctx);
                }
                attempt.fail(error.clone());
                Err(MutationError::Remote(error))
            }
        }
    }

    /// The caller stopped waiting before the remote call answered. It is
    /// resolved as a failure; the server may or may not have applied it, so
    /// the key is also refetched.
    fn abandon(&self, prepared: Prepared<T, I, A>) {
        let key = prepared.ctx.key.clone();
        warn!(mutation = self.config.name, attempt = prepared.attempt.id(), "attempt abandoned before resolving");
        let _ = self.resolve(prepared, Err(RemoteError::new(ABANDONED)));
        self.cache.invalidate(&key);
    }
}

/// Message recorded for an attempt whose caller went away mid-call.
pub const ABANDONED: &str = "cancelled before the server answered";

/// An attempt whose remote call has been dispatched. Dropping it before
/// `resolve` (the awaiting future was cancelled) rolls the attempt back.
struct InFlight<'a, T, I, O, A>
where
    T: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    mutation: &'a Mutation<T, I, O, A>,
    prepared: Option<Prepared<T, I, A>>,
}

impl<T, I, O, A> InFlight<'_, T, I, O, A>
where
    T: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    fn resolve(mut self, result: RemoteResult<O>) -> Result<O, MutationError> {
        match self.prepared.take() {
            Some(prepared) => self.mutation.resolve(prepared, result),
            None => result.map_err(MutationError::Remote),
        }
    }
}

impl<T, I, O, A> Drop for InFlight<'_, T, I, O, A>
where
    T: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            self.mutation.abandon(prepared);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
