//! State store for VPC topology records
//!
//! Provides:
//! - One JSON record per VPC under the state directory
//! - Atomic writes (temporary file + rename in the same directory)
//! - Schema validation on every load
//! - The advisory lock serializing vpcctl invocations

pub mod lock;
pub mod record;

pub use lock::{LockMode, StateLock};
pub use record::{PeeringRecord, SubnetRecord, SubnetType, VpcRecord};

use crate::error::{Error, Result};
use crate::manifest::RetryConfig;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const RECORD_EXTENSION: &str = "json";

/// Durable mapping from VPC name to its record
///
/// There is no in-memory cache; every read goes to disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    retry: RetryConfig,
}

impl StateStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>, retry: RetryConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, retry })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `name`
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, RECORD_EXTENSION))
    }

    /// Whether a record for `name` exists
    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Load and validate the record for `name`
    pub fn load(&self, name: &str) -> Result<VpcRecord> {
        let path = self.record_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::VpcNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Self::parse(&path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<VpcRecord> {
        let record: VpcRecord = serde_json::from_str(content).map_err(|e| Error::StateCorrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        record.validate(path)?;
        Ok(record)
    }

    /// Atomically write a record
    pub fn save(&self, record: &VpcRecord) -> Result<()> {
        let path = self.record_path(&record.name);
        let json = serde_json::to_string_pretty(record)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::debug!("Saved state record {}", path.display());
        Ok(())
    }

    /// Names of all records, in lexicographic order
    pub fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Every record, in lexicographic name order
    ///
    /// A single corrupt record fails the whole listing; callers that must
    /// make progress regardless use [`StateStore::scan`].
    pub fn list_all(&self) -> Result<Vec<VpcRecord>> {
        self.list_names()?
            .iter()
            .map(|name| self.load(name))
            .collect()
    }

    /// Every record, with per-record load results
    pub fn scan(&self) -> Result<Vec<(String, Result<VpcRecord>)>> {
        Ok(self
            .list_names()?
            .into_iter()
            .map(|name| {
                let record = self.load(&name);
                (name, record)
            })
            .collect())
    }

    /// Fail with `ConfigConflict` if any record already uses one of the
    /// host resource names in `resources`
    ///
    /// Unreadable records are skipped; they cannot be attributed anyway.
    pub fn ensure_unclaimed(&self, resources: &[&str]) -> Result<()> {
        for (name, record) in self.scan()? {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!("Skipping unreadable record {}: {}", name, e);
                    continue;
                }
            };

            for resource in resources {
                if let Some(owner) = record.owner_of(resource) {
                    return Err(Error::ConfigConflict(format!(
                        "'{}' is already used by {}",
                        resource, owner
                    )));
                }
            }
        }
        Ok(())
    }

    /// Remove the record for `name`; a missing record is not an error
    pub fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.record_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the exclusive lock for a mutating operation
    pub fn lock_exclusive(&self) -> Result<StateLock> {
        lock::acquire(&self.lock_path(), LockMode::Exclusive, &self.retry)
    }

    /// Take the shared lock for a read-only operation
    pub fn lock_shared(&self) -> Result<StateLock> {
        lock::acquire(&self.lock_path(), LockMode::Shared, &self.retry)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(lock::LOCK_FILE)
    }
}
