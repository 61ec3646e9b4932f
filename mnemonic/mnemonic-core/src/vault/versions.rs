use super::Vault;
use crate::audit::FileEvent;
use crate::catalog::MetadataStore;
use crate::error::Result;
use crate::indexer::IndexJob;
use crate::model::{FileId, VersionRecord};
use crate::validate;

impl Vault {
    /// Commit `data` as the version after `claimed`, which must be the current last
    /// version. Returns the new version number.
    pub fn check_in(&self, id: FileId, data: &[u8], comment: &str, claimed: u32) -> Result<u32> {
        let limits = &self.config.limits;
        validate::payload(limits, data)?;
        validate::version_comment(limits, comment)?;

        let version = {
            let _guard = self.check_in_lock.lock();
            self.chain().check_in(id, data, comment, claimed)?
        };

        self.record_event(id, FileEvent::VersionCreated { version });
        if let (Some(indexer), Ok(file)) = (&self.indexer, self.file(id)) {
            indexer.index(IndexJob {
                file_id: id,
                name: file.name,
                narration: file.narration,
                content: data.to_vec(),
            });
        }
        Ok(version)
    }

    /// Version 0 is the original.
    pub fn retrieve_version(&self, id: FileId, version: u32) -> Result<Vec<u8>> {
        let data = self.chain().retrieve(id, version)?;
        self.record_event(id, Self::access_event(version));
        Ok(data)
    }

    /// The newest payload and its version number.
    pub fn retrieve_last_version(&self, id: FileId) -> Result<(Vec<u8>, u32)> {
        let (data, version) = self.chain().retrieve_last(id)?;
        self.record_event(id, Self::access_event(version));
        Ok((data, version))
    }

    pub fn last_version_number(&self, id: FileId) -> Result<u32> {
        self.catalog.last_version_number(id)
    }

    pub fn version_hash(&self, id: FileId, version: u32) -> Result<String> {
        self.chain().hash(id, version)
    }

    /// Comment and check-in time of a version `1..=last`.
    pub fn version_details(&self, id: FileId, version: u32) -> Result<VersionRecord> {
        self.catalog.version_record(id, version)
    }

    pub fn version_history(&self, id: FileId) -> Result<Vec<VersionRecord>> {
        self.catalog.version_records(id)
    }

    /// Payloads of `v1` and `v2`, in that order.
    pub fn version_diff(&self, id: FileId, v1: u32, v2: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        self.chain().diff(id, v1, v2)
    }

    fn access_event(version: u32) -> FileEvent {
        match version {
            0 => FileEvent::AccessedOriginal,
            version => FileEvent::AccessedVersion { version },
        }
    }
}
