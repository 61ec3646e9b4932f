use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::Vault;
use crate::audit::FileEvent;
use crate::catalog::MetadataStore;
use crate::duplicates::{Candidate, DuplicateScorer};
use crate::error::{Error, Result};
use crate::indexer::IndexJob;
use crate::model::{AspectId, EntityKind, FileId, FileRecord, FilterType, NewFile, Taggable};
use crate::setops;
use crate::storage::ByteStore;
use crate::validate;

impl Vault {
    /// Store a new file. `saved_at` defaults to now; `index` hands the content to the
    /// attached indexer, if any.
    pub fn save_file(
        &self,
        name: &str,
        narration: &str,
        data: &[u8],
        saved_at: Option<DateTime<Utc>>,
        index: bool,
    ) -> Result<FileId> {
        let limits = &self.config.limits;
        validate::file_name(limits, name)?;
        validate::narration(limits, narration)?;
        validate::payload(limits, data)?;

        let password = ByteStore::generate_password();
        let location = self.bytes.save(data, &password)?;
        let file = NewFile {
            name: name.to_string(),
            narration: narration.to_string(),
            size: data.len() as u64,
            hash: ByteStore::compute_hash(data),
            location: location.clone(),
            password,
            saved_at: saved_at.unwrap_or_else(Utc::now),
        };
        let id = match self.catalog.record_save(file) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.bytes.delete(&location);
                return Err(e);
            }
        };

        self.record_event(id, FileEvent::Created { name: name.to_string() });
        if index {
            if let Some(indexer) = &self.indexer {
                indexer.index(IndexJob {
                    file_id: id,
                    name: name.to_string(),
                    narration: narration.to_string(),
                    content: data.to_vec(),
                });
            }
        }

        info!(user = %self.user, file_id = id, size = data.len(), "Saved file");
        Ok(id)
    }

    pub fn retrieve_original(&self, id: FileId) -> Result<Vec<u8>> {
        let data = self.chain().retrieve(id, 0)?;
        self.record_event(id, FileEvent::AccessedOriginal);
        Ok(data)
    }

    /// Remove a file with all its versions. Returns how many stored payloads went away.
    pub fn delete_file(&self, id: FileId) -> Result<usize> {
        let _guard = self.check_in_lock.lock();
        let locations = self.chain().locations(id)?;
        self.catalog.remove_file(id)?;

        for location in &locations {
            if let Err(e) = self.bytes.delete(location) {
                warn!(file_id = id, directory = %location.directory, error = %e, "Failed to delete stored payload");
            }
        }
        if let Some(indexer) = &self.indexer {
            indexer.remove(id);
        }
        self.record_event(id, FileEvent::Deleted);

        info!(user = %self.user, file_id = id, removed = locations.len(), "Deleted file");
        Ok(locations.len())
    }

    pub fn file_exists(&self, id: FileId) -> Result<bool> {
        self.catalog.exists(EntityKind::File, id)
    }

    pub fn file(&self, id: FileId) -> Result<FileRecord> {
        self.catalog.file_record(id)
    }

    pub fn file_name(&self, id: FileId) -> Result<String> {
        Ok(self.file(id)?.name)
    }

    pub fn file_size(&self, id: FileId) -> Result<u64> {
        Ok(self.file(id)?.size)
    }

    pub fn file_hash(&self, id: FileId) -> Result<String> {
        Ok(self.file(id)?.hash)
    }

    pub fn file_narration(&self, id: FileId) -> Result<String> {
        Ok(self.file(id)?.narration)
    }

    pub fn save_time(&self, id: FileId) -> Result<DateTime<Utc>> {
        Ok(self.file(id)?.saved_at)
    }

    pub fn update_name(&self, id: FileId, name: &str) -> Result<()> {
        validate::file_name(&self.config.limits, name)?;
        self.catalog.update_file(id, |file| file.name = name.to_string())?;
        self.record_event(id, FileEvent::Renamed { name: name.to_string() });
        Ok(())
    }

    pub fn update_narration(&self, id: FileId, narration: &str) -> Result<()> {
        validate::narration(&self.config.limits, narration)?;
        self.catalog
            .update_file(id, |file| file.narration = narration.to_string())?;
        Ok(())
    }

    pub fn update_save_time(&self, id: FileId, saved_at: DateTime<Utc>) -> Result<()> {
        self.catalog.update_file(id, |file| file.saved_at = saved_at)?;
        Ok(())
    }

    /// Mark a file as deleted at `when` without removing it.
    pub fn set_deletion_time(&self, id: FileId, when: DateTime<Utc>) -> Result<()> {
        self.catalog.update_file(id, |file| file.deleted_at = Some(when))?;
        Ok(())
    }

    pub fn deletion_time(&self, id: FileId) -> Result<DateTime<Utc>> {
        self.file(id)?
            .deleted_at
            .ok_or_else(|| Error::NonExistentResource(format!("deletion time of file {id}")))
    }

    pub fn reset_deletion_time(&self, id: FileId) -> Result<()> {
        self.catalog.update_file(id, |file| file.deleted_at = None)?;
        Ok(())
    }

    /// Other files with the same content, scored by how much else they share.
    pub fn duplicate_files(&self, id: FileId) -> Result<BTreeMap<FileId, f64>> {
        let record = self.file(id)?;
        let pool = self.catalog.file_records()?;
        Ok(DuplicateScorer::find(&Candidate::from(&record), &pool, Some(id)))
    }

    pub fn all_files(&self) -> Result<Vec<FileId>> {
        Ok(self.catalog.file_records()?.iter().map(|f| f.id).collect())
    }

    /// Files saved in `[from, to]`.
    pub fn files_saved_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<FileId>> {
        if from > to {
            return Err(Error::invalid("range start is after its end"));
        }
        self.files_where(|file| file.saved_at >= from && file.saved_at <= to)
    }

    pub fn files_saved_before(&self, when: DateTime<Utc>) -> Result<Vec<FileId>> {
        self.files_where(|file| file.saved_at < when)
    }

    pub fn files_saved_after(&self, when: DateTime<Utc>) -> Result<Vec<FileId>> {
        self.files_where(|file| file.saved_at > when)
    }

    /// Files saved on a UTC calendar day.
    pub fn files_saved_on(&self, day: NaiveDate) -> Result<Vec<FileId>> {
        self.files_where(|file| file.saved_at.date_naive() == day)
    }

    /// Narrow `files` to those carrying every (`And`) or any (`Or`) of `aspects`.
    pub fn filter_files_within_aspects(
        &self,
        aspects: &[AspectId],
        files: &[FileId],
        filter: FilterType,
    ) -> Result<Vec<FileId>> {
        let tagged = aspects
            .iter()
            .map(|&aspect| self.catalog.items_with_aspect(aspect, Taggable::File))
            .collect::<Result<Vec<_>>>()?;
        let matching = match filter {
            FilterType::And => setops::and_all(&tagged),
            FilterType::Or => setops::or_all(&tagged),
        };
        Ok(setops::and(files, &matching))
    }

    fn files_where(&self, keep: impl Fn(&FileRecord) -> bool) -> Result<Vec<FileId>> {
        Ok(self
            .catalog
            .file_records()?
            .iter()
            .filter(|file| keep(file))
            .map(|file| file.id)
            .collect())
    }
}
