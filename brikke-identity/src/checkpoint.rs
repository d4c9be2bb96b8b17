//! Checkpointing subsystem
//!
//! Persists and restores the local-scope identity map so numeric identities
//! survive process restarts without renumbering. The on-disk record is
//! self-describing: a version marker plus a blake3 checksum over the encoded
//! state, so a torn or tampered file is detected as corrupt rather than
//! silently decoded.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::model::{Identity, IdentityMap, IdentityScope, LabelSet, NumericIdentity};

const CHECKPOINT_FILE: &str = "identities.ckpt";
const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    written_at: i64,
    state: Vec<u8>,
    checksum: [u8; 32],
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub numeric: u32,
    pub labels: Vec<String>,
}

/// Disk-backed snapshot of the local-scope identity map.
///
/// The store owns its file exclusively; concurrent writers are not
/// supported. Saves replace the previous snapshot atomically, so an
/// interrupted save leaves the old file intact.
pub struct CheckpointStore {
    directory: PathBuf,
}

impl CheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(CHECKPOINT_FILE)
    }

    /// Atomically replaces the on-disk snapshot with the given map.
    pub fn save(&self, identities: &IdentityMap) -> Result<(), IdentityError> {
        fs::create_dir_all(&self.directory)?;

        let mut records: Vec<CheckpointRecord> = identities
            .values()
            .map(|identity| CheckpointRecord {
                numeric: identity.numeric.as_u32(),
                labels: identity.labels.iter().cloned().collect(),
            })
            .collect();
        records.sort_by_key(|record| record.numeric);

        let state = bincode::serialize(&records)
            .map_err(|e| IdentityError::CheckpointCorrupt(e.to_string()))?;
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            written_at: chrono::Utc::now().timestamp(),
            checksum: *blake3::hash(&state).as_bytes(),
            state,
        };
        let bytes = bincode::serialize(&checkpoint)
            .map_err(|e| IdentityError::CheckpointCorrupt(e.to_string()))?;

        // Write-to-temp-then-rename keeps the previous snapshot readable if
        // this save is interrupted.
        let tmp = self.directory.join(format!("{CHECKPOINT_FILE}.tmp"));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.path())?;
        Ok(())
    }

    /// Reads and verifies the snapshot. Restored entries come back with
    /// refcount zero; the restore path seeds the holds.
    pub fn load(&self) -> Result<IdentityMap, IdentityError> {
        let records = self.load_records()?;

        let mut map = IdentityMap::new();
        for record in records {
            let numeric = NumericIdentity(record.numeric);
            map.insert(
                numeric,
                Identity {
                    numeric,
                    labels: record.labels.into_iter().collect::<LabelSet>(),
                    scope: IdentityScope::Local,
                    refcount: 0,
                },
            );
        }
        Ok(map)
    }

    /// Reads and verifies the snapshot, returning the raw records in
    /// numeric order.
    pub fn load_records(&self) -> Result<Vec<CheckpointRecord>, IdentityError> {
        Self::read_records(&self.path())
    }

    /// Decodes a checkpoint file at an arbitrary path.
    pub fn read_records(path: &Path) -> Result<Vec<CheckpointRecord>, IdentityError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IdentityError::CheckpointUnavailable(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = bincode::deserialize(&bytes)
            .map_err(|e| IdentityError::CheckpointCorrupt(e.to_string()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(IdentityError::CheckpointCorrupt(format!(
                "unsupported version {}",
                checkpoint.version
            )));
        }
        let actual = *blake3::hash(&checkpoint.state).as_bytes();
        if actual != checkpoint.checksum {
            return Err(IdentityError::CheckpointCorrupt(format!(
                "checksum mismatch: expected {}, got {}",
                hex::encode(checkpoint.checksum),
                hex::encode(actual)
            )));
        }

        bincode::deserialize(&checkpoint.state)
            .map_err(|e| IdentityError::CheckpointCorrupt(e.to_string()))
    }
}
