//! ---
//! pps_section: "04-persistence"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Hash-verified store snapshots."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pps_entitlements::StoreState;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Result, StoreError};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
    state: StoreState,
}

/// Persist the store tables to `path`.
///
/// The envelope is written to a sibling temporary file and renamed into
/// place, so readers never observe a half-written snapshot.
pub fn save_snapshot(state: &StoreState, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
        hash: compute_hash(state)?,
        state: state.clone(),
    };
    let json = serde_json::to_vec_pretty(&envelope)?;

    let staging = staging_path(path);
    {
        let mut writer = BufWriter::new(File::create(&staging)?);
        writer.write_all(&json)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&staging, path)?;
    Ok(json.len())
}

/// Load a snapshot and return the contained tables.
pub fn load_snapshot(path: &Path) -> Result<StoreState> {
    let envelope = load_envelope(path)?;
    if envelope.version > SNAPSHOT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "snapshot version {} is newer than supported version {SNAPSHOT_VERSION}",
            envelope.version
        )));
    }
    if envelope.hash != compute_hash(&envelope.state)? {
        return Err(StoreError::HashMismatch);
    }
    Ok(envelope.state)
}

/// Verify the integrity of a snapshot without keeping the payload.
pub fn verify_snapshot(path: &Path) -> bool {
    match load_envelope(path) {
        Ok(envelope) => compute_hash(&envelope.state)
            .map(|hash| hash == envelope.hash)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn load_envelope(path: &Path) -> Result<SnapshotEnvelope> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn compute_hash(state: &StoreState) -> Result<String> {
    let serialized = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pps_entitlements::{Purchase, PurchaseStatus, UserId};
    use tempfile::tempdir;

    fn state() -> StoreState {
        let mut state = StoreState::default();
        state.save_purchase(Purchase::new(
            "p-1",
            Some(UserId::from("u-1")),
            PurchaseStatus::Completed,
        ));
        state
    }

    #[test]
    fn save_and_load_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");
        let state = state();

        assert!(save_snapshot(&state, &path).unwrap() > 0);
        assert!(verify_snapshot(&path));
        assert!(!dir.path().join("nested").join("snapshot.json.tmp").exists());
        assert_eq!(load_snapshot(&path).unwrap(), state);
    }

    #[test]
    fn verify_rejects_tampered_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        save_snapshot(&state(), &path).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["state"]["purchases"]["p-1"]["status"] = serde_json::json!("refunded");
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(!verify_snapshot(&path));
        assert!(matches!(load_snapshot(&path), Err(StoreError::HashMismatch)));
    }

    #[test]
    fn newer_versions_are_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        save_snapshot(&state(), &path).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["version"] = serde_json::json!(SNAPSHOT_VERSION + 1);
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert!(matches!(load_snapshot(&path), Err(StoreError::Corrupt(_))));
    }
}
