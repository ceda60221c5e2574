//! Outcome dispatch.
//!
//! Resolves each mutation attempt exactly once. Success settles the
//! optimistic layer, confirms to the user (optionally with an undo offer)
//! and marks the key stale so the server's answer replaces the projection.
//! Failure puts the snapshot back and reports the error. The two paths never
//! mix: success never rolls back, failure never refetches.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::optimistic::{self, MutationContext};
use crate::remote::RemoteError;

// ── Notifications ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Level {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UndoToken(u64);

/// Reversal control attached to a confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoOffer {
    pub token: UndoToken,
    pub label: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub text: String,
    pub undo: Option<UndoOffer>,
}

/// Where the user sees outcomes (toast area, status line, log...).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct NotificationLog {
    entries: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn all(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Hand over everything logged so far and start empty.
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.lock())
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, notification: Notification) {
        self.lock().push(notification);
    }
}

// ── Notification policies ──────────────────────────────────────

pub type SuccessTextFn<T, I, O, A> = Arc<dyn Fn(&O, &I, &MutationContext<T, A>) -> String + Send + Sync>;
pub type ErrorTextFn<I> = Arc<dyn Fn(&RemoteError, &I) -> String + Send + Sync>;

/// What to tell the user when a mutation succeeds.
pub enum SuccessNotice<T, I, O, A> {
    Silent,
    Fixed(String),
    Computed(SuccessTextFn<T, I, O, A>),
}

impl<T, I, O, A> SuccessNotice<T, I, O, A> {
    pub fn render(&self, output: &O, input: &I, ctx: &MutationContext<T, A>) -> Option<String> {
        match self {
            SuccessNotice::Silent => None,
            SuccessNotice::Fixed(text) => Some(text.clone()),
            SuccessNotice::Computed(f) => Some(f(output, input, ctx)),
        }
    }
}

impl<T, I, O, A> Clone for SuccessNotice<T, I, O, A> {
    fn clone(&self) -> Self {
        match self {
            SuccessNotice::Silent => SuccessNotice::Silent,
            SuccessNotice::Fixed(text) => SuccessNotice::Fixed(text.clone()),
            SuccessNotice::Computed(f) => SuccessNotice::Computed(Arc::clone(f)),
        }
    }
}

/// What to tell the user when a mutation fails.
pub enum ErrorNotice<I> {
    Silent,
    Fixed(String),
    Computed(ErrorTextFn<I>),
}

impl<I: 'static> ErrorNotice<I> {
    /// "operation failed: <message>"
    pub fn standard() -> Self {
        ErrorNotice::Computed(Arc::new(|error: &RemoteError, _input: &I| format!("operation failed: {error}")))
    }

    pub fn render(&self, error: &RemoteError, input: &I) -> Option<String> {
        match self {
            ErrorNotice::Silent => None,
            ErrorNotice::Fixed(text) => Some(text.clone()),
            ErrorNotice::Computed(f) => Some(f(error, input)),
        }
    }
}

impl<I> Clone for ErrorNotice<I> {
    fn clone(&self) -> Self {
        match self {
            ErrorNotice::Silent => ErrorNotice::Silent,
            ErrorNotice::Fixed(text) => ErrorNotice::Fixed(text.clone()),
            ErrorNotice::Computed(f) => ErrorNotice::Computed(Arc::clone(f)),
        }
    }
}

// ── Undo stack ─────────────────────────────────────────────────

/// Zero-argument reversal supplied by whoever offered the undo.
pub type UndoCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct UndoEntry {
    token: UndoToken,
    description: String,
    action: UndoCallback,
}

/// Most recent reversible actions, newest last. Pushing past `depth`
/// supersedes the oldest entry.
pub struct UndoStack {
    depth: usize,
    entries: VecDeque<UndoEntry>,
    issued: u64,
}

impl UndoStack {
    pub fn new(depth: usize) -> Self {
        UndoStack {
            depth: depth.max(1),
            entries: VecDeque::new(),
            issued: 0,
        }
    }

    pub fn push(&mut self, description: impl Into<String>, action: UndoCallback) -> UndoToken {
        self.issued += 1;
        let token = UndoToken(self.issued);
        self.entries.push_back(UndoEntry {
            token,
            description: description.into(),
            action,
        });
        while self.entries.len() > self.depth {
            if let Some(dropped) = self.entries.pop_front() {
                debug!(token = dropped.token.0, description = %dropped.description, "undo superseded");
            }
        }
        token
    }

    fn take(&mut self, token: UndoToken) -> Option<UndoEntry> {
        let index = self.entries.iter().position(|e| e.token == token)?;
        self.entries.remove(index)
    }

    fn take_latest(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    pub fn contains(&self, token: UndoToken) -> bool {
        self.entries.iter().any(|e| e.token == token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ── Dispatcher ─────────────────────────────────────────────────

pub const NOTHING_TO_UNDO: &str = "Nothing to undo";

/// Shared outcome dispatcher: one notifier and one undo stack per client.
#[derive(Clone)]
pub struct Outcomes {
    notifier: Arc<dyn Notifier>,
    undo: Arc<Mutex<UndoStack>>,
}

impl Outcomes {
    pub fn new(notifier: Arc<dyn Notifier>, undo_depth: usize) -> Self {
        Outcomes {
            notifier,
            undo: Arc::new(Mutex::new(UndoStack::new(undo_depth))),
        }
    }

    fn stack(&self) -> MutexGuard<'_, UndoStack> {
        self.undo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self, level: Level, text: impl Into<String>, undo: Option<UndoOffer>) {
        self.notifier.notify(Notification {
            level,
            text: text.into(),
            undo,
        });
    }

    /// Register a reversal and build the offer to attach to a confirmation.
    pub fn offer_undo(&self, label: &str, duration: Duration, description: &str, action: UndoCallback) -> UndoOffer {
        let token = self.stack().push(description, action);
        UndoOffer {
            token,
            label: label.to_string(),
            duration,
        }
    }

    /// Success path after the caller's callback ran: forget the layer,
    /// confirm, and schedule reconciliation.
    pub fn succeeded<T, A>(
        &self,
        cache: &CacheStore<T>,
        ctx: &MutationContext<T, A>,
        text: Option<String>,
        undo: Option<UndoOffer>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        optimistic::settle(cache, ctx);
        if let Some(text) = text {
            info!(key = %ctx.key, %text, undoable = undo.is_some(), "mutation succeeded");
            self.notify(Level::Success, text, undo);
        }
        cache.invalidate(&ctx.key);
    }

    /// Failure path before the caller's callback runs: put the snapshot
    /// back and report.
    pub fn failed<T, A>(
        &self,
        cache: &CacheStore<T>,
        ctx: &MutationContext<T, A>,
        error: &RemoteError,
        text: Option<String>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        warn!(key = %ctx.key, %error, optimistic = ctx.is_optimistic(), "mutation failed");
        optimistic::rollback(cache, ctx);
        if let Some(text) = text {
            self.notify(Level::Error, text, None);
        }
    }

    /// Run the reversal behind `token`. An expired or superseded token
    /// reports "Nothing to undo" instead. Returns whether anything ran.
    pub async fn undo(&self, token: UndoToken) -> bool {
        let entry = self.stack().take(token);
        self.run_undo(entry).await
    }

    /// Run the newest pending reversal, if any.
    pub async fn undo_latest(&self) -> bool {
        let entry = self.stack().take_latest();
        self.run_undo(entry).await
    }

    async fn run_undo(&self, entry: Option<UndoEntry>) -> bool {
        match entry {
            Some(entry) => {
                info!(token = entry.token.0, description = %entry.description, "undo");
                (entry.action)().await;
                true
            }
            None => {
                self.notify(Level::Info, NOTHING_TO_UNDO, None);
                false
            }
        }
    }

    pub fn can_undo(&self, token: UndoToken) -> bool {
        self.stack().contains(token)
    }

    pub fn pending_undos(&self) -> usize {
        self.stack().len()
    }

    /// Drop every pending reversal, e.g. on sign-out or when a newer change
    /// makes them unsafe to run.
    pub fn clear_undo(&self) {
        self.stack().clear();
    }
}

// ── Tests ──────────────────────────────────────────────────────
