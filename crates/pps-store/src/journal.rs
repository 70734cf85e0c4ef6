//! ---
//! pps_section: "04-persistence"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Append-only journal of store mutations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pps_entitlements::{Entitlement, EntitlementId, Purchase, PurchaseId, StoreState};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::{snapshot::SNAPSHOT_VERSION, Result, StoreError};

/// First line of every journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl JournalHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: SNAPSHOT_VERSION,
            created_at,
            hash,
        }
    }
}

/// A single change applied to the store tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// A new entitlement row.
    EntitlementInserted {
        /// The row as stored.
        entitlement: Entitlement,
    },
    /// An entitlement row was deactivated.
    EntitlementDeactivated {
        /// Row identifier.
        id: EntitlementId,
        /// Revocation time stamped into `valid_until`.
        at: DateTime<Utc>,
    },
    /// A purchase row was inserted or replaced.
    PurchaseSaved {
        /// The row as stored.
        purchase: Purchase,
    },
    /// A purchase was flagged as having its entitlements created.
    PurchaseMarked {
        /// Purchase identifier.
        id: PurchaseId,
        /// Time of the update.
        at: DateTime<Utc>,
    },
}

impl Mutation {
    /// Operation tag as written in the journal.
    pub fn op(&self) -> &'static str {
        match self {
            Mutation::EntitlementInserted { .. } => "entitlement_inserted",
            Mutation::EntitlementDeactivated { .. } => "entitlement_deactivated",
            Mutation::PurchaseSaved { .. } => "purchase_saved",
            Mutation::PurchaseMarked { .. } => "purchase_marked",
        }
    }

    /// Apply the mutation to in-memory tables without uniqueness checks.
    pub fn apply(&self, state: &mut StoreState) -> Result<()> {
        match self {
            Mutation::EntitlementInserted { entitlement } => {
                state.insert_entitlement(entitlement.clone(), false)?;
            }
            Mutation::EntitlementDeactivated { id, at } => {
                if state.deactivate_entitlement(*id, *at).is_none() {
                    return Err(StoreError::Corrupt(format!(
                        "journal deactivates unknown entitlement {id}"
                    )));
                }
            }
            Mutation::PurchaseSaved { purchase } => state.save_purchase(purchase.clone()),
            Mutation::PurchaseMarked { id, at } => {
                state.mark_entitlements_created(id, *at);
            }
        }
        Ok(())
    }
}

/// Journal line: a mutation with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the mutation was recorded.
    pub timestamp: DateTime<Utc>,
    /// The recorded change.
    pub mutation: Mutation,
}

impl JournalEntry {
    /// Construct an unsequenced entry.
    pub fn new(mutation: Mutation) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            mutation,
        }
    }
}

/// Append-only writer for the journal.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
    /// File length as of this writer's last append or catch-up.
    len: u64,
}

impl JournalWriter {
    /// Open a journal for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists || is_empty(path)? {
            let header = JournalHeader::new();
            let line = serde_json::to_string(&header)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 0,
                len: fs::metadata(path)?.len(),
            });
        }

        let next_sequence = last_sequence(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
            len: fs::metadata(path)?.len(),
        })
    }

    /// Append a mutation and return the assigned sequence number and byte count.
    pub fn append(&mut self, mutation: Mutation) -> Result<(u64, usize)> {
        self.next_sequence += 1;
        let mut entry = JournalEntry::new(mutation);
        entry.sequence = self.next_sequence;
        let line = serde_json::to_string(&entry)?;
        let bytes = line.len() + 1;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.len += bytes as u64;
        Ok((entry.sequence, bytes))
    }

    /// Apply entries that other writers appended since this writer last
    /// touched the file, and continue numbering after them.
    ///
    /// Callers must hold the data directory lock.
    pub fn catch_up(&mut self, state: &mut StoreState) -> Result<usize> {
        let len = fs::metadata(&self.path)?.len();
        if len == self.len {
            return Ok(0);
        }
        if len < self.len {
            return Err(StoreError::Corrupt(format!(
                "journal {} shrank from {} to {len} bytes",
                self.path.display(),
                self.len
            )));
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.len))?;
        let mut applied = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            entry.mutation.apply(state)?;
            self.next_sequence = entry.sequence;
            applied += 1;
        }
        self.len = len;
        Ok(applied)
    }

    /// Sequence number of the last appended entry.
    pub fn sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Location of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_empty(path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.len() == 0)
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0u64;
    for entry in JournalReader::open(path)? {
        last = entry?.sequence;
    }
    Ok(last)
}

/// Replay the journal in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(JournalEntry) -> Result<()>,
{
    let mut count = 0usize;
    for entry in JournalReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Rebuild the store tables from the journal alone.
pub fn rebuild(path: &Path) -> Result<StoreState> {
    let mut state = StoreState::default();
    replay(path, |entry| entry.mutation.apply(&mut state))?;
    Ok(state)
}

/// Streaming iterator over journal entries.
pub struct JournalReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl JournalReader {
    /// Open the journal for sequential reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(StoreError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pps_entitlements::{EntitlementSource, ProductId, PurchaseStatus, UserId};
    use tempfile::tempdir;

    fn grant() -> Entitlement {
        Entitlement::grant(
            UserId::from("u"),
            ProductId::from("p"),
            EntitlementSource::manual("ops"),
            Utc::now(),
        )
    }

    #[test]
    fn sequences_continue_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let mut writer = JournalWriter::open(&path).unwrap();
            let (seq, bytes) = writer
                .append(Mutation::EntitlementInserted { entitlement: grant() })
                .unwrap();
            assert_eq!(seq, 1);
            assert!(bytes > 0);
        }
        let mut writer = JournalWriter::open(&path).unwrap();
        assert_eq!(writer.sequence(), 1);
        let (seq, _) = writer
            .append(Mutation::PurchaseMarked {
                id: PurchaseId::from("p-1"),
                at: Utc::now(),
            })
            .unwrap();
        assert_eq!(seq, 2);

        let sequences: Vec<_> = JournalReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn rebuild_replays_mutations_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let row = grant();
        let mut writer = JournalWriter::open(&path).unwrap();
        writer
            .append(Mutation::PurchaseSaved {
                purchase: Purchase::new("p-1", Some(UserId::from("u")), PurchaseStatus::Completed),
            })
            .unwrap();
        writer
            .append(Mutation::EntitlementInserted {
                entitlement: row.clone(),
            })
            .unwrap();
        writer
            .append(Mutation::EntitlementDeactivated {
                id: row.id,
                at: Utc::now(),
            })
            .unwrap();
        writer
            .append(Mutation::PurchaseMarked {
                id: PurchaseId::from("p-1"),
                at: Utc::now(),
            })
            .unwrap();

        let state = rebuild(&path).unwrap();
        assert_eq!(state.entitlements.len(), 1);
        assert!(!state.entitlements[0].is_active);
        assert!(state.purchases[&PurchaseId::from("p-1")].entitlements_created);
    }

    #[test]
    fn catch_up_applies_entries_from_another_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut first = JournalWriter::open(&path).unwrap();
        let mut second = JournalWriter::open(&path).unwrap();
        let mut seen = StoreState::default();

        first
            .append(Mutation::PurchaseSaved {
                purchase: Purchase::new("p-1", Some(UserId::from("u")), PurchaseStatus::Completed),
            })
            .unwrap();
        first
            .append(Mutation::EntitlementInserted { entitlement: grant() })
            .unwrap();

        assert_eq!(second.catch_up(&mut seen).unwrap(), 2);
        assert_eq!(second.sequence(), 2);
        assert_eq!(seen.entitlements.len(), 1);
        assert!(seen.purchases.contains_key(&PurchaseId::from("p-1")));
        assert_eq!(second.catch_up(&mut seen).unwrap(), 0);

        let (seq, _) = second
            .append(Mutation::PurchaseMarked {
                id: PurchaseId::from("p-1"),
                at: Utc::now(),
            })
            .unwrap();
        assert_eq!(seq, 3);
        let sequences: Vec<_> = JournalReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(rebuild(&path).unwrap().purchases[&PurchaseId::from("p-1")].entitlements_created);
    }

    #[test]
    fn entries_are_tagged_by_operation() {
        let line = serde_json::to_value(JournalEntry::new(Mutation::PurchaseMarked {
            id: PurchaseId::from("p-9"),
            at: Utc::now(),
        }))
        .unwrap();
        assert_eq!(line["mutation"]["op"], "purchase_marked");
        assert_eq!(line["mutation"]["id"], "p-9");
    }
}
