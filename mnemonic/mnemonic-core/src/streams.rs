//! User-independent byte streams, each sealed with the caller's passphrase.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::catalog::{load_json, write_json_atomic};
use crate::config::VaultConfig;
use crate::error::{check_id, Error, Result};
use crate::model::{StoredBlob, StreamId};
use crate::storage::ByteStore;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    last_id: StreamId,
    blobs: BTreeMap<StreamId, StoredBlob>,
}

pub struct ByteStreams {
    store: ByteStore,
    registry_path: PathBuf,
    registry: Mutex<Registry>,
}

impl ByteStreams {
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let dir = config.streams_dir();
        let store = ByteStore::open(dir.join("files"), config.container)?;
        let registry_path = dir.join("registry.json");
        let registry = load_json(&registry_path)?.unwrap_or_default();
        Ok(Self {
            store,
            registry_path,
            registry: Mutex::new(registry),
        })
    }

    pub fn store(&self, bytes: &[u8], passphrase: &str, reference: Option<i32>) -> Result<StreamId> {
        let location = self.store.save(bytes, passphrase)?;

        let mut registry = self.registry.lock();
        let id = registry.last_id + 1;
        registry.last_id = id;
        registry.blobs.insert(
            id,
            StoredBlob {
                id,
                location: location.clone(),
                reference,
            },
        );
        if let Err(e) = write_json_atomic(&self.registry_path, &*registry) {
            registry.blobs.remove(&id);
            registry.last_id = id - 1;
            drop(registry);
            let _ = self.store.delete(&location);
            return Err(e);
        }

        info!(id, size = bytes.len(), "Stored byte stream");
        Ok(id)
    }

    /// The bytes and the reference number they were stored with.
    pub fn retrieve(&self, id: StreamId, passphrase: &str) -> Result<(Vec<u8>, Option<i32>)> {
        let blob = self.blob(id)?;
        let bytes = self.store.retrieve(&blob.location, passphrase)?;
        Ok((bytes, blob.reference))
    }

    pub fn reference_number(&self, id: StreamId) -> Result<Option<i32>> {
        Ok(self.blob(id)?.reference)
    }

    /// Only a caller holding the passphrase may delete.
    pub fn delete(&self, id: StreamId, passphrase: &str) -> Result<()> {
        let blob = self.blob(id)?;
        self.store.retrieve(&blob.location, passphrase)?;

        let mut registry = self.registry.lock();
        let removed = registry.blobs.remove(&id);
        if let Err(e) = write_json_atomic(&self.registry_path, &*registry) {
            if let Some(removed) = removed {
                registry.blobs.insert(id, removed);
            }
            return Err(e);
        }
        drop(registry);

        self.store.delete(&blob.location)?;
        info!(id, "Deleted byte stream");
        Ok(())
    }

    pub fn exists(&self, id: StreamId) -> Result<bool> {
        check_id(id, "stream")?;
        Ok(self.registry.lock().blobs.contains_key(&id))
    }

    fn blob(&self, id: StreamId) -> Result<StoredBlob> {
        check_id(id, "stream")?;
        self.registry
            .lock()
            .blobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::missing("stream", id))
    }
}
