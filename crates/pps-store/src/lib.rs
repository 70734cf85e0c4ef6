//! ---
//! pps_section: "04-persistence"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Durable entitlement store backends."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! File-backed implementation of the entitlement store contract.
//!
//! State lives in a SHA-256 verified JSON snapshot that is rewritten
//! atomically after every mutation; each mutation is also appended to a
//! sequence-numbered JSON-lines journal.

pub use pps_entitlements::{StoreError, StoreResult as Result};

pub mod file;
pub mod journal;
pub mod metrics;
pub mod snapshot;

pub use file::FileStore;
pub use journal::replay as replay_journal;
pub use journal::{JournalEntry, JournalReader, JournalWriter, Mutation};
pub use metrics::StoreMetrics;
pub use snapshot::{load_snapshot, save_snapshot, verify_snapshot, SNAPSHOT_VERSION};
