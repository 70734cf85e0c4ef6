//! ---
//! pps_section: "04-persistence"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "File-backed entitlement store."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use fd_lock::RwLock as DirLock;
use parking_lot::Mutex;
use pps_entitlements::{
    Entitlement, EntitlementFilter, EntitlementId, EntitlementStore, Purchase, PurchaseFilter,
    PurchaseId, StoreState,
};
use tracing::{debug, info, warn};

use crate::journal::{self, JournalWriter, Mutation};
use crate::metrics::StoreMetrics;
use crate::snapshot::{load_snapshot, save_snapshot};
use crate::{Result, StoreError};

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "store.snapshot.json";
/// Journal file name inside the data directory.
pub const JOURNAL_FILE: &str = "store.journal.jsonl";
/// Advisory lock file shared by every handle on the data directory.
pub const LOCK_FILE: &str = "store.lock";

struct Inner {
    dir_lock: DirLock<File>,
    state: StoreState,
    journal: JournalWriter,
}

/// Durable store kept in a data directory.
///
/// Handles in the same or different processes may share a directory. Every
/// operation holds an advisory lock on [`LOCK_FILE`] (exclusive for writes,
/// shared for reads) and first applies journal entries written by other
/// handles, so the uniqueness check and the insert see the same rows.
pub struct FileStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
    enforce_active_uniqueness: bool,
    metrics: Option<StoreMetrics>,
}

impl FileStore {
    /// Open (or create) a store in `dir`.
    pub fn open(dir: impl AsRef<Path>, enforce_active_uniqueness: bool) -> Result<Self> {
        Self::open_with_metrics(dir, enforce_active_uniqueness, None)
    }

    /// Open a store and publish its metrics.
    ///
    /// The snapshot is authoritative; when it is missing but a journal exists
    /// the tables are rebuilt from the journal. A snapshot that fails hash
    /// verification is an error, never silently replaced.
    pub fn open_with_metrics(
        dir: impl AsRef<Path>,
        enforce_active_uniqueness: bool,
        metrics: Option<StoreMetrics>,
    ) -> Result<Self> {
        let started = Instant::now();
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let journal_path = dir.join(JOURNAL_FILE);

        let mut dir_lock = DirLock::new(
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(dir.join(LOCK_FILE))?,
        );
        let (state, journal) = {
            let _guard = dir_lock.write()?;
            let state = if snapshot_path.exists() {
                load_snapshot(&snapshot_path)?
            } else if journal_path.exists() {
                warn!(dir = %dir.display(), "snapshot missing; rebuilding store from journal");
                journal::rebuild(&journal_path)?
            } else {
                StoreState::default()
            };
            (state, JournalWriter::open(&journal_path)?)
        };

        info!(
            dir = %dir.display(),
            purchases = state.purchases.len(),
            entitlements = state.entitlements.len(),
            journal_sequence = journal.sequence(),
            "file store opened"
        );
        if let Some(metrics) = &metrics {
            metrics.observe_open(started.elapsed().as_secs_f64());
        }

        Ok(Self {
            dir,
            inner: Mutex::new(Inner {
                dir_lock,
                state,
                journal,
            }),
            enforce_active_uniqueness,
            metrics,
        })
    }

    /// Data directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Location of the journal file.
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Copy of the current tables.
    pub fn state(&self) -> Result<StoreState> {
        self.read(StoreState::clone)
    }

    /// Run `op` on up-to-date tables under the shared directory lock.
    fn read<T>(&self, op: impl FnOnce(&StoreState) -> T) -> Result<T> {
        let mut inner = self.inner.lock();
        let Inner {
            dir_lock,
            state,
            journal,
        } = &mut *inner;
        let _guard = dir_lock.read()?;
        catch_up(state, journal)?;
        Ok(op(&*state))
    }

    /// Run `op` on up-to-date tables under the exclusive directory lock.
    fn write<T>(
        &self,
        op: impl FnOnce(&mut StoreState, &mut JournalWriter) -> Result<T>,
    ) -> Result<T> {
        let mut inner = self.inner.lock();
        let Inner {
            dir_lock,
            state,
            journal,
        } = &mut *inner;
        let _guard = dir_lock.write()?;
        catch_up(state, journal)?;
        op(state, journal)
    }

    /// Journal the mutation, write the new snapshot, then publish `next`.
    fn commit(
        &self,
        state: &mut StoreState,
        journal: &mut JournalWriter,
        next: StoreState,
        mutation: Mutation,
    ) -> Result<()> {
        let op = mutation.op();
        let (sequence, bytes) = journal.append(mutation)?;
        match save_snapshot(&next, &self.snapshot_path()) {
            Ok(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot(true);
                }
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot(false);
                }
                return Err(err);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_mutation(op, bytes);
        }
        debug!(op, sequence, "store mutation committed");
        *state = next;
        Ok(())
    }
}

fn catch_up(state: &mut StoreState, journal: &mut JournalWriter) -> Result<()> {
    let applied = journal.catch_up(state)?;
    if applied > 0 {
        debug!(
            applied,
            sequence = journal.sequence(),
            "applied journal entries from another handle"
        );
    }
    Ok(())
}

impl EntitlementStore for FileStore {
    fn entitlements(&self, filter: &EntitlementFilter) -> Result<Vec<Entitlement>> {
        self.read(|state| state.entitlements(filter))
    }

    fn insert_entitlement(&self, row: Entitlement) -> Result<Entitlement> {
        self.write(|state, journal| {
            let mut next = state.clone();
            let row = match next.insert_entitlement(row, self.enforce_active_uniqueness) {
                Ok(row) => row,
                Err(err @ StoreError::ActiveConflict { .. }) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_conflict();
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            self.commit(
                state,
                journal,
                next,
                Mutation::EntitlementInserted {
                    entitlement: row.clone(),
                },
            )?;
            Ok(row)
        })
    }

    fn deactivate_entitlement(
        &self,
        id: EntitlementId,
        at: DateTime<Utc>,
    ) -> Result<Option<Entitlement>> {
        self.write(|state, journal| {
            let Some(current) = state.entitlements.iter().find(|row| row.id == id).cloned()
            else {
                return Ok(None);
            };
            if !current.is_active {
                return Ok(Some(current));
            }
            let mut next = state.clone();
            let updated = next.deactivate_entitlement(id, at);
            self.commit(state, journal, next, Mutation::EntitlementDeactivated { id, at })?;
            Ok(updated)
        })
    }

    fn purchase(&self, id: &PurchaseId) -> Result<Option<Purchase>> {
        self.read(|state| state.purchases.get(id).cloned())
    }

    fn purchases(&self, filter: &PurchaseFilter) -> Result<Vec<Purchase>> {
        self.read(|state| state.purchases(filter))
    }

    fn save_purchase(&self, purchase: Purchase) -> Result<()> {
        self.write(|state, journal| {
            let mut next = state.clone();
            next.save_purchase(purchase.clone());
            self.commit(state, journal, next, Mutation::PurchaseSaved { purchase })
        })
    }

    fn mark_entitlements_created(&self, id: &PurchaseId) -> Result<bool> {
        self.write(|state, journal| {
            if !state.purchases.contains_key(id) {
                return Ok(false);
            }
            let at = Utc::now();
            let mut next = state.clone();
            next.mark_entitlements_created(id, at);
            self.commit(state, journal, next, Mutation::PurchaseMarked { id: id.clone(), at })?;
            Ok(true)
        })
    }

    fn enforces_active_uniqueness(&self) -> bool {
        self.enforce_active_uniqueness
    }
}
