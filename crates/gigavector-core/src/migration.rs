//! Background index migration: rebuild the primary index under a new kind
//! while the database stays readable, swapping it in atomically at the end.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::index::{IndexKind, PrimaryIndex, VectorIndex};
use crate::store::RowId;

/// Rows copied between cancellation checks.
pub const MIGRATION_BATCH: usize = 100;

/// Progress events emitted over the migration channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationEvent {
    /// A batch finished.
    Batch {
        /// Rows migrated so far.
        migrated: usize,
        /// Rows in the snapshot.
        total: usize,
    },
    /// The rebuilt index was swapped in.
    Completed {
        /// Rows migrated.
        total: usize,
    },
    /// Cancellation was observed at a batch boundary; the original index
    /// is untouched.
    Cancelled {
        /// Rows migrated before the cancel.
        migrated: usize,
    },
}

/// Handle to a running migration.
pub struct MigrationHandle {
    cancel: Arc<AtomicBool>,
    events: Receiver<MigrationEvent>,
    join: Option<JoinHandle<Result<()>>>,
}

impl MigrationHandle {
    /// Requests cancellation; observed at the next batch boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// The progress event stream.
    #[must_use]
    pub fn events(&self) -> &Receiver<MigrationEvent> {
        &self.events
    }

    /// Blocks until the migration thread finishes.
    ///
    /// # Errors
    ///
    /// Propagates the migration error, or `Internal` if the thread
    /// panicked.
    pub fn wait(mut self) -> Result<()> {
        match self.join.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Internal("migration thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

/// Starts a background rebuild of `db`'s primary index as `target_kind`.
///
/// The new index is trained (when the kind requires it) and populated from
/// a snapshot of the live rows in batches of [`MIGRATION_BATCH`], checking
/// the cancel flag between batches. On success the new index replaces the
/// old one under the database's index lock.
pub fn start_migration(db: &Arc<Database>, target_kind: IndexKind) -> Result<MigrationHandle> {
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = unbounded();
    let db = Arc::clone(db);
    let flag = Arc::clone(&cancel);

    let join = std::thread::Builder::new()
        .name("gigavector-migration".into())
        .spawn(move || run_migration(&db, target_kind, &flag, &tx))?;

    Ok(MigrationHandle {
        cancel,
        events: rx,
        join: Some(join),
    })
}

fn run_migration(
    db: &Database,
    target_kind: IndexKind,
    cancel: &AtomicBool,
    events: &Sender<MigrationEvent>,
) -> Result<()> {
    let new_index = PrimaryIndex::build(
        target_kind,
        db.shared_store(),
        db.metric(),
        db.engine_config(),
    )?;
    if target_kind.needs_training() {
        new_index.train()?;
    }

    // Snapshot of live row ids; rows added after this point are picked up
    // by the caller re-running a migration.
    let rows: Vec<RowId> = {
        let store = db.shared_store();
        let store = store.read();
        store.iter_live().map(|(row, _)| row).collect()
    };
    let total = rows.len();
    tracing::info!(?target_kind, total, "migration started");

    let mut migrated = 0usize;
    for batch in rows.chunks(MIGRATION_BATCH) {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!(migrated, "migration cancelled");
            let _ = events.send(MigrationEvent::Cancelled { migrated });
            return Ok(());
        }
        {
            let store = db.shared_store();
            let store = store.read();
            for &row in batch {
                if store.is_tombstoned(row) {
                    continue;
                }
                new_index.insert(row, store.row_unchecked(row))?;
            }
        }
        migrated += batch.len();
        let _ = events.send(MigrationEvent::Batch { migrated, total });
    }

    db.swap_index(new_index);
    tracing::info!(total, "migration completed");
    let _ = events.send(MigrationEvent::Completed { total });
    Ok(())
}
