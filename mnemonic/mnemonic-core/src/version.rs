//! Version chain of a stored file
//!
//! Version 0 is the original. Each check-in writes a sibling directory `v<N>` next to
//! the original's `v0`, reusing the original container's names and password.
//! Containers are created without replacing anything and the catalog only accepts
//! `last + 1`, so of two sessions claiming the same version exactly one wins.

use chrono::Utc;
use tracing::{debug, info};

use crate::catalog::MetadataStore;
use crate::error::{Error, Result};
use crate::model::{FileId, FileRecord, VersionRecord};
use crate::storage::{BlobLocation, ByteStore};

pub struct VersionChain<'a> {
    store: &'a ByteStore,
    catalog: &'a dyn MetadataStore,
}

impl<'a> VersionChain<'a> {
    pub fn new(store: &'a ByteStore, catalog: &'a dyn MetadataStore) -> Self {
        Self { store, catalog }
    }

    /// Commit `payload` as the version after `claimed`. Fails with `VersionConflict`
    /// when someone already checked in past `claimed`.
    pub fn check_in(
        &self,
        file_id: FileId,
        payload: &[u8],
        comment: &str,
        claimed: u32,
    ) -> Result<u32> {
        let record = self.catalog.file_record(file_id)?;
        if payload.is_empty() {
            return Err(Error::invalid("version payload must not be empty"));
        }

        let last = self.catalog.last_version_number(file_id)?;
        if last > claimed {
            return Err(Error::VersionConflict { claimed, actual: last });
        }
        if claimed > last {
            return Err(Error::IllegalVersion { requested: claimed, last });
        }

        let next = last + 1;
        let location = record
            .location
            .relocated(record.location.directory.next_version(next)?);
        match self.store.save_at(payload, &location, &record.password) {
            Ok(()) => {}
            // another session wrote this version first
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let actual = self.catalog.last_version_number(file_id)?.max(next);
                return Err(Error::VersionConflict { claimed, actual });
            }
            Err(e) => return Err(e),
        }

        let version = VersionRecord {
            file_id,
            version: next,
            comment: comment.to_string(),
            hash: ByteStore::compute_hash(payload),
            directory: location.directory.clone(),
            checked_in_at: Utc::now(),
        };
        if let Err(e) = self.catalog.record_version(version) {
            // a recorded version at this number points at the same directory
            if !matches!(e, Error::VersionConflict { .. }) {
                let _ = self.store.delete(&location);
            }
            return Err(e);
        }

        info!(file_id, version = next, size = payload.len(), "Checked in new version");
        Ok(next)
    }

    /// Location of a version, after range checks.
    pub fn locate(&self, file_id: FileId, version: u32) -> Result<(FileRecord, BlobLocation)> {
        let record = self.catalog.file_record(file_id)?;
        let last = self.catalog.last_version_number(file_id)?;
        if version > last {
            return Err(Error::IllegalVersion { requested: version, last });
        }

        let location = if version == 0 {
            record.location.clone()
        } else {
            let version = self.catalog.version_record(file_id, version)?;
            record.location.relocated(version.directory)
        };
        Ok((record, location))
    }

    pub fn retrieve(&self, file_id: FileId, version: u32) -> Result<Vec<u8>> {
        let (record, location) = self.locate(file_id, version)?;
        if !self.store.exists(&location) {
            return Err(Error::corrupted(format!(
                "file {file_id} version {version} is missing from storage"
            )));
        }
        debug!(file_id, version, directory = %location.directory, "Retrieving version");
        self.store.retrieve(&location, &record.password)
    }

    /// The last version and its number; the original when nothing was checked in.
    pub fn retrieve_last(&self, file_id: FileId) -> Result<(Vec<u8>, u32)> {
        let last = self.catalog.last_version_number(file_id)?;
        Ok((self.retrieve(file_id, last)?, last))
    }

    /// Both payloads, for comparison by the caller.
    pub fn diff(&self, file_id: FileId, v1: u32, v2: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        if v1 == v2 {
            return Err(Error::invalid("cannot diff a version against itself"));
        }
        Ok((self.retrieve(file_id, v1)?, self.retrieve(file_id, v2)?))
    }

    /// Content hash of a version; version 0 is the original's hash.
    pub fn hash(&self, file_id: FileId, version: u32) -> Result<String> {
        if version == 0 {
            return Ok(self.catalog.file_record(file_id)?.hash);
        }
        Ok(self.catalog.version_record(file_id, version)?.hash)
    }

    /// Every stored location of a file, original first.
    pub fn locations(&self, file_id: FileId) -> Result<Vec<BlobLocation>> {
        let record = self.catalog.file_record(file_id)?;
        let last = self.catalog.last_version_number(file_id)?;
        let mut locations = vec![record.location.clone()];
        for version in 1..=last {
            let version = self.catalog.version_record(file_id, version)?;
            locations.push(record.location.relocated(version.directory));
        }
        Ok(locations)
    }
}
