use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::container::{self, ContainerEntry};
use super::path::{Segment, StoragePath};
use crate::config::ContainerConfig;
use crate::error::{Error, Result};

const ARCHIVE_EXTENSION: &str = "mfc";
const TIME_BUCKET_FORMAT: &str = "%Y%m%d%H%M%S";

/// Coordinates of one stored payload: the container file and the entry inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    /// Entry name inside the container, unrelated to the user-visible file name.
    pub assumed_name: String,
    pub archive_name: String,
    /// Directory relative to the store root.
    pub directory: StoragePath,
}

impl BlobLocation {
    /// Same names, different directory. Used for every version of a file.
    pub fn relocated(&self, directory: StoragePath) -> Self {
        Self {
            assumed_name: self.assumed_name.clone(),
            archive_name: self.archive_name.clone(),
            directory,
        }
    }

    pub fn archive_path(&self, root: &Path) -> PathBuf {
        self.directory.to_path(root).join(&self.archive_name)
    }
}

/// Persists payloads as single-entry sealed containers under
/// `<root>/<time-bucket>/<disambiguator>/v<N>/`.
pub struct ByteStore {
    root: PathBuf,
    kdf: ContainerConfig,
    counter: AtomicU64,
}

impl ByteStore {
    pub fn open(root: impl Into<PathBuf>, kdf: ContainerConfig) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            kdf,
            counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kdf(&self) -> &ContainerConfig {
        &self.kdf
    }

    /// Store a payload at a freshly allocated location.
    pub fn save(&self, payload: &[u8], password: &str) -> Result<BlobLocation> {
        check_payload(payload)?;
        check_password(password)?;

        let location = BlobLocation {
            assumed_name: Uuid::new_v4().simple().to_string(),
            archive_name: format!("{}.{}", Uuid::new_v4().simple(), ARCHIVE_EXTENSION),
            directory: self.allocate_directory()?,
        };
        if let Err(e) = self.write(payload, &location, password) {
            self.prune(&location.directory);
            return Err(e);
        }

        debug!(
            directory = %location.directory,
            archive = %location.archive_name,
            size = payload.len(),
            "Stored blob"
        );
        Ok(location)
    }

    /// Store a payload at a caller-chosen location, creating its directory. An existing
    /// container there is never replaced; that fails with an `AlreadyExists` I/O error.
    pub fn save_at(&self, payload: &[u8], location: &BlobLocation, password: &str) -> Result<()> {
        check_payload(payload)?;
        check_password(password)?;
        std::fs::create_dir_all(location.directory.to_path(&self.root))?;
        let entry = ContainerEntry::new(location.assumed_name.clone(), payload);
        container::create_file(
            &location.archive_path(&self.root),
            std::slice::from_ref(&entry),
            Some(password),
            &self.kdf,
        )?;

        debug!(
            directory = %location.directory,
            archive = %location.archive_name,
            size = payload.len(),
            "Stored blob at fixed location"
        );
        Ok(())
    }

    pub fn retrieve(&self, location: &BlobLocation, password: &str) -> Result<Vec<u8>> {
        check_password(password)?;
        let path = location.archive_path(&self.root);
        container::read_file(&path, Some(password))?
            .into_iter()
            .find(|entry| entry.name == location.assumed_name)
            .map(|entry| entry.data)
            .ok_or_else(|| {
                Error::corrupted(format!(
                    "entry {} missing from {}",
                    location.assumed_name,
                    path.display()
                ))
            })
    }

    /// Remove a container and any directories it leaves empty. Absent containers are fine.
    pub fn delete(&self, location: &BlobLocation) -> Result<()> {
        let path = location.archive_path(&self.root);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Deleted blob"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.prune(&location.directory);
        Ok(())
    }

    pub fn exists(&self, location: &BlobLocation) -> bool {
        location.archive_path(&self.root).is_file()
    }

    /// SHA-256 of the payload, lowercase hex.
    pub fn compute_hash(payload: &[u8]) -> String {
        hex::encode(ring::digest::digest(&ring::digest::SHA256, payload))
    }

    /// Random per-blob password.
    pub fn generate_password() -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn write(&self, payload: &[u8], location: &BlobLocation, password: &str) -> Result<()> {
        let entry = ContainerEntry::new(location.assumed_name.clone(), payload);
        container::write_file(
            &location.archive_path(&self.root),
            std::slice::from_ref(&entry),
            Some(password),
            &self.kdf,
        )
    }

    /// Claims `<bucket>/<n>/v0/` for the first `n` whose directory can be created exclusively.
    fn allocate_directory(&self) -> Result<StoragePath> {
        let bucket = Utc::now().format(TIME_BUCKET_FORMAT).to_string();
        let bucket_dir = self.root.join(&bucket);
        std::fs::create_dir_all(&bucket_dir)?;

        loop {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            match std::fs::create_dir(bucket_dir.join(n.to_string())) {
                Ok(()) => {
                    let path = StoragePath::new(vec![
                        Segment::Dir(bucket),
                        Segment::Dir(n.to_string()),
                        Segment::Version(0),
                    ])?;
                    std::fs::create_dir(path.to_path(&self.root))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn prune(&self, directory: &StoragePath) {
        let mut dir = directory.to_path(&self.root);
        while dir != self.root && dir.starts_with(&self.root) {
            if std::fs::remove_dir(&dir).is_err() {
                break;
            }
            if !dir.pop() {
                break;
            }
        }
    }
}

fn check_payload(payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::invalid("payload must not be empty"));
    }
    Ok(())
}

fn check_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::invalid("password must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ByteStore {
        let kdf = ContainerConfig {
            kdf_memory_kib: 64,
            kdf_iterations: 1,
            kdf_parallelism: 1,
        };
        ByteStore::open(dir.path().join("files"), kdf).unwrap()
    }

    #[test]
    fn save_then_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let location = store.save(b"some bytes", "secret").unwrap();
        assert_eq!(location.directory.version(), Some(0));
        assert_eq!(location.directory.segments().len(), 3);
        assert!(store.exists(&location));
        assert_eq!(store.retrieve(&location, "secret").unwrap(), b"some bytes");
    }

    #[test]
    fn wrong_password_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let location = store.save(b"payload", "right").unwrap();
        assert!(matches!(
            store.retrieve(&location, "wrong"),
            Err(Error::StorageCorrupted(_))
        ));
        assert!(matches!(store.retrieve(&location, ""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_inputs_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(matches!(store.save(b"", "pw"), Err(Error::InvalidArgument(_))));
        assert!(matches!(store.save(b"x", ""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn same_instant_saves_get_distinct_directories() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut seen = std::collections::HashSet::new();
        for i in 0..20u8 {
            let location = store.save(&[i + 1], "pw").unwrap();
            assert!(seen.insert(location.directory.to_string()));
        }
    }

    #[test]
    fn delete_is_idempotent_and_prunes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let location = store.save(b"data", "pw").unwrap();
        store.delete(&location).unwrap();
        assert!(!store.exists(&location));
        store.delete(&location).unwrap();

        assert!(matches!(
            store.retrieve(&location, "pw"),
            Err(Error::StorageCorrupted(_))
        ));
        // bucket directories are gone, the root stays
        assert!(store.root().exists());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[test]
    fn save_at_keeps_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let original = store.save(b"v0", "pw").unwrap();
        let next = original.relocated(original.directory.next_version(1).unwrap());
        store.save_at(b"v1", &next, "pw").unwrap();

        assert_eq!(store.retrieve(&original, "pw").unwrap(), b"v0");
        assert_eq!(store.retrieve(&next, "pw").unwrap(), b"v1");
        assert_eq!(
            next.directory.to_path(store.root()).parent(),
            original.directory.to_path(store.root()).parent()
        );
    }

    #[test]
    fn save_at_refuses_taken_location() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let original = store.save(b"v0", "pw").unwrap();
        let next = original.relocated(original.directory.next_version(1).unwrap());
        store.save_at(b"first", &next, "pw").unwrap();
        match store.save_at(b"second", &next, "pw") {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        assert_eq!(store.retrieve(&next, "pw").unwrap(), b"first");
    }

    #[test]
    fn swapped_in_clear_container_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let location = store.save(b"sealed", "pw").unwrap();
        let forged = ContainerEntry::new(location.assumed_name.clone(), b"forged".to_vec());
        container::write_file(
            &location.archive_path(store.root()),
            std::slice::from_ref(&forged),
            None,
            store.kdf(),
        )
        .unwrap();

        assert!(matches!(
            store.retrieve(&location, "pw"),
            Err(Error::StorageCorrupted(_))
        ));
    }

    #[test]
    fn hash_is_content_only() {
        let a = ByteStore::compute_hash(b"abc");
        assert_eq!(a, ByteStore::compute_hash(b"abc"));
        assert_ne!(a, ByteStore::compute_hash(b"abd"));
        assert_eq!(
            a,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn generated_passwords_differ() {
        let a = ByteStore::generate_password();
        assert_eq!(a.len(), 32);
        assert_ne!(a, ByteStore::generate_password());
    }
}
