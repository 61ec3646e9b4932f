//! Per-user vault
//!
//! Ties the byte store, catalog, version chain, audit log and indexer together behind
//! one handle. Layout under `<root>/users/<user>/`: `files/`, `catalog.json`,
//! `audit.log` and `index/`.
//!
//! Several `Vault`s may be open on one user at once, in one process or several: the
//! catalog is re-read under a file lock for every change and version containers are
//! never overwritten, so a stale check-in fails with `VersionConflict`. Check-ins
//! through one shared `Vault` are additionally serialised in memory.

mod annotations;
mod files;
mod groupings;
mod versions;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::archive::{self, ArchiveBuilder};
use crate::audit::{AuditEntry, AuditLog, FileEvent};
use crate::catalog::JsonCatalog;
use crate::config::VaultConfig;
use crate::error::{check_id, Error, Result};
use crate::indexer::Indexer;
use crate::model::{FileId, GroupingKind};
use crate::storage::metrics::StorageMetrics;
use crate::storage::{ByteStore, ContainerEntry};
use crate::validate;
use crate::version::VersionChain;

pub struct Vault {
    user: String,
    dir: PathBuf,
    config: VaultConfig,
    bytes: ByteStore,
    catalog: JsonCatalog,
    audit: Option<AuditLog>,
    indexer: Option<Arc<dyn Indexer>>,
    check_in_lock: Mutex<()>,
}

impl Vault {
    /// Set up storage for a new user.
    pub fn create(config: VaultConfig, user: &str) -> Result<Self> {
        validate::user_name(user)?;
        let dir = config.user_dir(user);
        std::fs::create_dir_all(config.users_dir())?;
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateName(format!("user {user:?} already exists")))
            }
            Err(e) => return Err(e.into()),
        }
        info!(user, dir = %dir.display(), "Created user");
        Self::load(config, user, dir)
    }

    pub fn open(config: VaultConfig, user: &str) -> Result<Self> {
        validate::user_name(user)?;
        let dir = config.user_dir(user);
        if !dir.is_dir() {
            return Err(Error::NonExistentResource(format!("user {user:?}")));
        }
        Self::load(config, user, dir)
    }

    fn load(config: VaultConfig, user: &str, dir: PathBuf) -> Result<Self> {
        let bytes = ByteStore::open(dir.join("files"), config.container)?;
        let catalog = JsonCatalog::open(dir.join("catalog.json"))?;
        let audit = if config.audit {
            Some(AuditLog::open(dir.join("audit.log"))?)
        } else {
            None
        };

        Ok(Self {
            user: user.to_string(),
            dir,
            config,
            bytes,
            catalog,
            audit,
            indexer: None,
            check_in_lock: Mutex::new(()),
        })
    }

    /// Remove a user and everything stored for them.
    pub fn delete_user(config: &VaultConfig, user: &str) -> Result<()> {
        validate::user_name(user)?;
        let dir = config.user_dir(user);
        if !dir.is_dir() {
            return Err(Error::NonExistentResource(format!("user {user:?}")));
        }
        std::fs::remove_dir_all(&dir)?;
        info!(user, "Deleted user");
        Ok(())
    }

    /// Known users, sorted.
    pub fn users(config: &VaultConfig) -> Result<Vec<String>> {
        let dir = config.users_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut users = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if validate::user_name(name).is_ok() {
                        users.push(name.to_string());
                    }
                }
            }
        }
        users.sort();
        Ok(users)
    }

    pub fn user_exists(config: &VaultConfig, user: &str) -> Result<bool> {
        validate::user_name(user)?;
        Ok(config.user_dir(user).is_dir())
    }

    /// Attach a full-text indexer; saves requesting indexing feed it from then on.
    pub fn with_indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a search index for this user belongs.
    pub fn index_dir(&self) -> PathBuf {
        self.dir.join("index")
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn catalog(&self) -> &JsonCatalog {
        &self.catalog
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FileId>> {
        match &self.indexer {
            Some(indexer) => indexer.search(query, limit),
            None => Err(Error::IllegalOperation("no indexer attached".to_string())),
        }
    }

    /// Audit trail of a file, oldest first. Empty when auditing is off.
    pub fn file_logs(&self, file_id: FileId) -> Result<Vec<AuditEntry>> {
        check_id(file_id, "file")?;
        match &self.audit {
            Some(audit) => audit.entries_for_file(file_id),
            None => Ok(Vec::new()),
        }
    }

    pub fn storage_metrics(&self) -> Result<StorageMetrics> {
        StorageMetrics::calculate(&self.dir)
    }

    /// Package the originals of a grouping's files into `<out_dir>/<out_name>`.
    pub fn archive_grouping(
        &self,
        kind: GroupingKind,
        id: u64,
        out_dir: &Path,
        out_name: &str,
        password: Option<&str>,
    ) -> Result<PathBuf> {
        check_id(id, &kind.to_string())?;
        ArchiveBuilder::new(&self.bytes, &self.catalog)
            .build_grouping_archive(kind, id, out_dir, out_name, password)
    }

    pub fn open_archive(path: &Path, password: Option<&str>) -> Result<Vec<ContainerEntry>> {
        archive::open_archive(path, password)
    }

    fn chain(&self) -> VersionChain<'_> {
        VersionChain::new(&self.bytes, &self.catalog)
    }

    /// Audit failures are logged, never returned.
    fn record_event(&self, file_id: FileId, event: FileEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.append(file_id, event) {
                warn!(file_id, error = %e, "Failed to write audit entry");
            }
        }
    }
}
