//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Idempotent entitlement writes."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pps_logging::{pps_info, LogContext};

use crate::model::{Entitlement, EntitlementId, ProductId, PurchaseId, UserId};
use crate::reconciler::GrantInstruction;
use crate::store::{EntitlementFilter, EntitlementStore, StoreError, StoreResult};

type PairKey = (UserId, ProductId);

static PROCESS_PAIR_LOCKS: Lazy<PairLocks> = Lazy::new(PairLocks::new);

/// Per-(user, product) mutexes for stores without an atomic uniqueness check.
///
/// Entries are dropped once no caller holds or waits for them.
#[derive(Debug, Default)]
pub struct PairLocks {
    locks: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock table shared by every writer in the process, whichever service
    /// or store handle it belongs to.
    pub fn process_wide() -> &'static PairLocks {
        &PROCESS_PAIR_LOCKS
    }

    /// Run `f` while holding the lock of the pair.
    pub fn with_pair<R>(&self, user: &UserId, product: &ProductId, f: impl FnOnce() -> R) -> R {
        let key = (user.clone(), product.clone());
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let result = {
            let _guard = lock.lock();
            f()
        };
        let mut locks = self.locks.lock();
        // One reference in the map, one held here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        result
    }

    /// Number of pairs currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of applying one grant instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Granted(Entitlement),
    /// An active row already existed, possibly written by a concurrent caller.
    AlreadyGranted(Option<EntitlementId>),
}

/// Applies grant instructions so that a pair never ends up with two active rows.
#[derive(Clone)]
pub struct EntitlementWriter {
    store: Arc<dyn EntitlementStore>,
    locks: &'static PairLocks,
}

impl EntitlementWriter {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            store,
            locks: PairLocks::process_wide(),
        }
    }

    /// Insert an active row for the instruction unless the pair already has one.
    pub fn apply(
        &self,
        instruction: &GrantInstruction,
        now: DateTime<Utc>,
    ) -> StoreResult<WriteOutcome> {
        let row = Entitlement::grant(
            instruction.user.clone(),
            instruction.product.clone(),
            instruction.source.clone(),
            now,
        );
        self.insert_unique(row)
    }

    /// Insert an already-built active row, honouring pair uniqueness.
    pub fn insert_unique(&self, row: Entitlement) -> StoreResult<WriteOutcome> {
        if self.store.enforces_active_uniqueness() {
            return self.insert_or_conflict(row);
        }
        let user = row.user_id.clone();
        let product = row.product_id.clone();
        self.locks.with_pair(&user, &product, || {
            let existing = self
                .store
                .entitlements(&EntitlementFilter::for_pair(&user, &product).active())?;
            if let Some(current) = existing.first() {
                self.log_already_granted(&row);
                return Ok(WriteOutcome::AlreadyGranted(Some(current.id)));
            }
            self.insert_or_conflict(row)
        })
    }

    fn insert_or_conflict(&self, row: Entitlement) -> StoreResult<WriteOutcome> {
        match self.store.insert_entitlement(row.clone()) {
            Ok(inserted) => {
                let source = inserted.source.to_string();
                pps_info!(
                    context = LogContext::new()
                        .with_user(inserted.user_id.as_str())
                        .with_product(inserted.product_id.as_str())
                        .with_source(&source),
                    "entitlement granted"
                );
                Ok(WriteOutcome::Granted(inserted))
            }
            Err(StoreError::ActiveConflict { .. }) => {
                self.log_already_granted(&row);
                Ok(WriteOutcome::AlreadyGranted(None))
            }
            Err(error) => Err(error),
        }
    }

    fn log_already_granted(&self, row: &Entitlement) {
        let source = row.source.to_string();
        pps_info!(
            context = LogContext::new()
                .with_user(row.user_id.as_str())
                .with_product(row.product_id.as_str())
                .with_source(&source),
            "entitlement already active; skipping"
        );
    }

    /// Flag the purchase as fully processed.
    pub fn mark_entitlements_created(&self, purchase: &PurchaseId) -> StoreResult<bool> {
        self.store.mark_entitlements_created(purchase)
    }
}
