//! World ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed after every applied command.
//! Never queried at runtime; World is the runtime truth.

use crate::task::Task;
use crate::world::{Event, World};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;
#[cfg(feature = "profile")]
use std::time::Instant;
use uuid::Uuid;

const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const REVISION_KEY: &str = "revision";
const TRASH_KEY: &str = "trash";

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: &str) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(TASKS)?;
            let _ = txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load the entire World from disk. Called once at boot.
    pub fn load_world(&self, title_max: usize) -> Result<World, SaveFileError> {
        let mut world = World::with_title_max(title_max);
        let txn = self.db.begin_read()?;

        let tasks = txn.open_table(TASKS)?;
        for entry in tasks.iter()? {
            let (_, value) = entry?;
            let task: Task = decode(value.value())?;
            world.tasks.insert(task.id, task);
        }

        let meta = txn.open_table(META)?;
        if let Some(rev) = meta.get(REVISION_KEY)? {
            if let Ok(bytes) = <[u8; 8]>::try_from(rev.value()) {
                world.revision = u64::from_le_bytes(bytes);
            }
        }
        if let Some(trash) = meta.get(TRASH_KEY)? {
            world.trash = decode::<Vec<(Uuid, Vec<Task>)>>(trash.value())?;
        }

        Ok(world)
    }

    /// Flush a single event to disk. Called after every World::apply().
    /// Writes the affected rows, the trash and the revision in one transaction.
    pub fn flush(&self, world: &World, event: &Event) -> Result<(), SaveFileError> {
        #[cfg(feature = "profile")]
        let total_start = Instant::now();
        let txn = self.db.begin_write()?;
        {
            let mut tasks = txn.open_table(TASKS)?;
            let mut meta = txn.open_table(META)?;

            match event {
                Event::TaskCreated { task, .. } | Event::TaskUpdated { task, .. } => {
                    tasks.insert(task.id.as_bytes().as_slice(), encode(task)?.as_slice())?;
                }

                Event::TasksChanged { tasks: changed, .. } => {
                    for task in changed {
                        tasks.insert(task.id.as_bytes().as_slice(), encode(task)?.as_slice())?;
                    }
                }

                Event::TasksDeleted { tasks: removed, .. } => {
                    for task in removed {
                        tasks.remove(task.id.as_bytes().as_slice())?;
                    }
                    meta.insert(TRASH_KEY, encode(&world.trash)?.as_slice())?;
                }

                Event::TasksRestored { tasks: restored, .. } => {
                    for task in restored {
                        tasks.insert(task.id.as_bytes().as_slice(), encode(task)?.as_slice())?;
                    }
                    meta.insert(TRASH_KEY, encode(&world.trash)?.as_slice())?;
                }
            }

            meta.insert(REVISION_KEY, world.revision.to_le_bytes().as_slice())?;
        }
        txn.commit()?;
        #[cfg(feature = "profile")]
        tracing::debug!(
            revision = event.revision(),
            total_us = total_start.elapsed().as_micros() as u64,
            "flush committed transaction"
        );
        Ok(())
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SaveFileError> {
    postcard::to_allocvec(value).map_err(|e| SaveFileError::Encode(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, SaveFileError> {
    postcard::from_bytes(bytes).map_err(|e| SaveFileError::Decode(e.to_string()))
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SaveFileError {
    Redb(String),
    Decode(String),
    Encode(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl std::fmt::Display for SaveFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveFileError::Redb(e) => write!(f, "redb: {e}"),
            SaveFileError::Decode(e) => write!(f, "decode: {e}"),
            SaveFileError::Encode(e) => write!(f, "encode: {e}"),
        }
    }
}

impl std::error::Error for SaveFileError {}

// ── Tests ──────────────────────────────────────────────────────
