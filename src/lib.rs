//! Optimistic mutations over a cached todo collection.
//!
//! Reads go through [`cache::CacheStore`]; writes are [`mutation::Mutation`]s
//! that project their effect into the cache before the remote call, then
//! either confirm (and reconcile by refetch) or roll back (and report).
//! [`todos::TodoClient`] assembles the concrete todo mutations; [`backend`]
//! provides an in-process server to run them against.

pub mod backend;
pub mod cache;
pub mod executor;
pub mod mutation;
pub mod optimistic;
pub mod outcome;
pub mod persist;
pub mod projections;
pub mod remote;
pub mod settings;
pub mod task;
pub mod todos;
pub mod views;
pub mod world;

pub use cache::{CacheStore, Collection, QueryKey};
pub use executor::{MutationState, MutationStatus};
pub use mutation::{Mutation, MutationError, ValidationError, Variant};
pub use outcome::{Level, Notification, NotificationLog, Notifier, Outcomes, UndoOffer, UndoToken};
pub use remote::{BulkAction, RemoteApi, RemoteError};
pub use settings::Settings;
pub use task::{NewTask, Priority, ShoppingItem, Task, TaskKind, TaskPatch};
pub use todos::{BulkRequest, Edit, Session, ShoppingToggle, Toggle, TodoClient};
