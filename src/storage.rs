//! On-disk persistence.
//!
//! Layout under the data directory:
//!
//! ```text
//! towns/<sanitized-name>.json   one full record per town
//! invites.json                  pending town invites
//! claims.json                   individual claims and trust grants
//! upkeep.json                   date of the last upkeep run
//! backups/YYYY-MM-DD/           dated snapshots of all of the above
//! ```
//!
//! Every write goes to a temporary sibling that is synced and then renamed
//! over the target, so a crash mid-write leaves the previous version intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;
use crate::town::Town;

/// Number of dated snapshots kept under `backups/`.
pub const BACKUP_RETENTION: usize = 10;

const TOWNS_DIR: &str = "towns";
const BACKUPS_DIR: &str = "backups";

/// File name of the pending-invite index.
pub const INVITES_FILE: &str = "invites.json";
/// File name of the individual-claim store.
pub const CLAIMS_FILE: &str = "claims.json";
/// File name of the upkeep bookkeeping record.
pub const UPKEEP_FILE: &str = "upkeep.json";

/// Reduce a town name to a safe, case-folded file stem.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Handle on a data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open (creating if needed) a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in [root.clone(), root.join(TOWNS_DIR), root.join(BACKUPS_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// The data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for a town name.
    #[must_use]
    pub fn town_path(&self, name: &str) -> PathBuf {
        self.root
            .join(TOWNS_DIR)
            .join(format!("{}.json", sanitize_name(name)))
    }

    /// Durably write a full town record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn save_town(&self, town: &Town) -> Result<(), StorageError> {
        write_json(&self.town_path(&town.name), town)
    }

    /// Delete a town record. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_town(&self, name: &str) -> Result<(), StorageError> {
        let path = self.town_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Load every town record.
    ///
    /// Files that fail to parse are skipped with a warning so that one bad
    /// record cannot keep the rest of the world offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the towns directory cannot be listed.
    pub fn load_towns(&self) -> Result<Vec<Town>, StorageError> {
        let dir = self.root.join(TOWNS_DIR);
        let mut towns = Vec::new();
        for path in json_files(&dir)? {
            match read_json::<Town>(&path) {
                Ok(town) => towns.push(town),
                Err(e) => tracing::warn!("skipping unreadable town record: {e}"),
            }
        }
        towns.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(towns)
    }

    /// Durably write a top-level document such as [`INVITES_FILE`].
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn save_document<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        write_json(&self.root.join(file), value)
    }

    /// Read a top-level document, or its default if it was never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load_document<T: DeserializeOwned + Default>(
        &self,
        file: &str,
    ) -> Result<T, StorageError> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(T::default());
        }
        read_json(&path)
    }

    /// Copy all current state into `backups/<date>/`, then prune old
    /// snapshots down to [`BACKUP_RETENTION`].
    ///
    /// # Errors
    ///
    /// Returns an error if any copy fails. Pruning failures are only logged.
    pub fn snapshot(&self, date: NaiveDate) -> Result<PathBuf, StorageError> {
        let target = self.root.join(BACKUPS_DIR).join(date.format("%Y-%m-%d").to_string());
        let target_towns = target.join(TOWNS_DIR);
        fs::create_dir_all(&target_towns).map_err(|e| StorageError::io(&target_towns, e))?;

        for path in json_files(&self.root.join(TOWNS_DIR))? {
            if let Some(name) = path.file_name() {
                copy_file(&path, &target_towns.join(name))?;
            }
        }
        for file in [INVITES_FILE, CLAIMS_FILE, UPKEEP_FILE] {
            let source = self.root.join(file);
            if source.exists() {
                copy_file(&source, &target.join(file))?;
            }
        }

        self.prune_snapshots();
        tracing::info!(path = %target.display(), "state snapshot written");
        Ok(target)
    }

    /// Dated snapshot directories, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backups directory cannot be listed.
    pub fn list_snapshots(&self) -> Result<Vec<(NaiveDate, PathBuf)>, StorageError> {
        let dir = self.root.join(BACKUPS_DIR);
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let date = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok());
            if let Some(date) = date {
                snapshots.push((date, path));
            }
        }
        snapshots.sort_by_key(|(date, _)| *date);
        Ok(snapshots)
    }

    fn prune_snapshots(&self) {
        let snapshots = match self.list_snapshots() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("cannot list snapshots for pruning: {e}");
                return;
            }
        };
        let excess = snapshots.len().saturating_sub(BACKUP_RETENTION);
        for (_, path) in snapshots.into_iter().take(excess) {
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), "cannot prune snapshot: {e}");
            }
        }
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StorageError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn copy_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    fs::copy(from, to).map_err(|e| StorageError::io(to, e))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StorageError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| StorageError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let text = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| StorageError::json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Valid_Town-1"), "valid_town-1");
        assert_eq!(sanitize_name("../etc"), "___etc");
    }

    #[test]
    fn test_document_roundtrip_and_default() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let empty: BTreeMap<String, u32> = storage.load_document("missing.json").unwrap();
        assert!(empty.is_empty());

        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u32);
        storage.save_document("doc.json", &doc).unwrap();
        let loaded: BTreeMap<String, u32> = storage.load_document("doc.json").unwrap();
        assert_eq!(loaded, doc);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        let result: Result<BTreeMap<String, u32>, _> = storage.load_document("bad.json");
        assert!(matches!(result, Err(StorageError::Json { .. })));
    }

    #[test]
    fn test_snapshot_retention() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        storage.save_document(INVITES_FILE, &BTreeMap::<String, u32>::new()).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for day in 0..13 {
            let date = start + chrono::Days::new(day);
            let path = storage.snapshot(date).unwrap();
            assert!(path.join(INVITES_FILE).exists());
        }

        let snapshots = storage.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), BACKUP_RETENTION);
        assert_eq!(snapshots[0].0, start + chrono::Days::new(3));
        assert_eq!(snapshots[9].0, start + chrono::Days::new(12));
    }
}
