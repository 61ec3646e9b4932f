//! Packs the originals of a grouping's files into one container.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::MetadataStore;
use crate::error::{Error, Result};
use crate::model::{EntityKind, GroupingKind};
use crate::storage::{container, ByteStore, ContainerEntry};

/// Holds no state of its own; build one wherever an archive is needed.
pub struct ArchiveBuilder<'a> {
    store: &'a ByteStore,
    catalog: &'a dyn MetadataStore,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(store: &'a ByteStore, catalog: &'a dyn MetadataStore) -> Self {
        Self { store, catalog }
    }

    /// Write `<out_dir>/<out_name>` holding each member's original under its file name.
    ///
    /// Nothing is written unless every member's container is present. `None` leaves the
    /// archive unencrypted; `Some("")` is rejected.
    pub fn build_grouping_archive(
        &self,
        kind: GroupingKind,
        id: u64,
        out_dir: &Path,
        out_name: &str,
        password: Option<&str>,
    ) -> Result<PathBuf> {
        if password == Some("") {
            return Err(Error::invalid("archive password must not be empty"));
        }
        check_out_name(out_name)?;

        let members = self.catalog.resolve_grouping_members(kind, id)?;
        let mut sources = Vec::with_capacity(members.len());
        for file_id in members {
            if !self.catalog.exists(EntityKind::File, file_id)? {
                return Err(Error::corrupted(format!(
                    "{kind} {id} lists file {file_id}, which has no record"
                )));
            }
            let record = self.catalog.file_record(file_id)?;
            if !self.store.exists(&record.location) {
                return Err(Error::corrupted(format!(
                    "file {file_id} ({}) is missing from storage",
                    record.name
                )));
            }
            sources.push(record);
        }

        let mut entries = Vec::with_capacity(sources.len());
        for record in &sources {
            let data = self.store.retrieve(&record.location, &record.password)?;
            debug!(file_id = record.id, size = data.len(), "Adding file to archive");
            entries.push(ContainerEntry::new(record.name.clone(), data));
        }

        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(out_name);
        container::write_file(&path, &entries, password, self.store.kdf())?;

        info!(
            %kind,
            id,
            files = entries.len(),
            encrypted = password.is_some(),
            path = %path.display(),
            "Built grouping archive"
        );
        Ok(path)
    }
}

/// Entries of an archive produced by [`ArchiveBuilder`].
pub fn open_archive(path: &Path, password: Option<&str>) -> Result<Vec<ContainerEntry>> {
    if password == Some("") {
        return Err(Error::invalid("archive password must not be empty"));
    }
    container::read_file(path, password)
}

fn check_out_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::invalid(format!("{name:?} is not a usable archive name")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JsonCatalog;
    use crate::config::ContainerConfig;
    use crate::model::{FileId, NewFile, Taggable};
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: ByteStore,
        catalog: JsonCatalog,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let kdf = ContainerConfig {
            kdf_memory_kib: 64,
            kdf_iterations: 1,
            kdf_parallelism: 1,
        };
        let store = ByteStore::open(dir.path().join("files"), kdf).unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        Fixture { dir, store, catalog }
    }

    fn save(f: &Fixture, name: &str, payload: &[u8]) -> FileId {
        let password = ByteStore::generate_password();
        let location = f.store.save(payload, &password).unwrap();
        f.catalog
            .record_save(NewFile {
                name: name.to_string(),
                narration: String::new(),
                size: payload.len() as u64,
                hash: ByteStore::compute_hash(payload),
                location,
                password,
                saved_at: Utc::now(),
            })
            .unwrap()
    }

    #[test]
    fn three_member_collection() {
        let f = fixture();
        let collection = f.catalog.create_collection("trip", "").unwrap();
        for (name, data) in [("a.txt", &b"aaa"[..]), ("b.jpg", b"bb"), ("c.md", b"c")] {
            let id = save(&f, name, data);
            f.catalog.add_to_collection(collection, id).unwrap();
        }
        let outside = save(&f, "other.txt", b"not included");

        let builder = ArchiveBuilder::new(&f.store, &f.catalog);
        let out = f.dir.path().join("out");
        let path = builder
            .build_grouping_archive(GroupingKind::Collection, collection, &out, "trip.mfc", Some("pw"))
            .unwrap();

        let entries = open_archive(&path, Some("pw")).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.jpg", "c.md"]);
        assert_eq!(entries[1].data, b"bb");
        assert!(!names.contains(&"other.txt"));
        assert!(f.catalog.file_record(outside).is_ok());

        assert!(matches!(open_archive(&path, Some("nope")), Err(Error::StorageCorrupted(_))));
        assert!(open_archive(&path, None).is_err());
    }

    #[test]
    fn missing_member_writes_nothing() {
        let f = fixture();
        let aspect = f.catalog.create_aspect("red", "").unwrap();
        let kept = save(&f, "kept", b"1");
        let lost = save(&f, "lost", b"2");
        f.catalog.apply_aspect(aspect, Taggable::File, kept).unwrap();
        f.catalog.apply_aspect(aspect, Taggable::File, lost).unwrap();
        f.store.delete(&f.catalog.file_record(lost).unwrap().location).unwrap();

        let out = f.dir.path().join("out");
        let builder = ArchiveBuilder::new(&f.store, &f.catalog);
        assert!(matches!(
            builder.build_grouping_archive(GroupingKind::Aspect, aspect, &out, "red.mfc", None),
            Err(Error::StorageCorrupted(_))
        ));
        assert!(!out.join("red.mfc").exists());
    }

    #[test]
    fn argument_checks() {
        let f = fixture();
        let builder = ArchiveBuilder::new(&f.store, &f.catalog);
        let out = f.dir.path();

        assert!(matches!(
            builder.build_grouping_archive(GroupingKind::Briefcase, 1, out, "x", Some("")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            builder.build_grouping_archive(GroupingKind::Briefcase, 1, out, "../x", None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            builder.build_grouping_archive(GroupingKind::Collection, 9, out, "x", None),
            Err(Error::NonExistentResource(_))
        ));
    }

    #[test]
    fn unencrypted_archive_of_empty_briefcase() {
        let f = fixture();
        let builder = ArchiveBuilder::new(&f.store, &f.catalog);
        let path = builder
            .build_grouping_archive(GroupingKind::Briefcase, 1, f.dir.path(), "global.mfc", None)
            .unwrap();
        assert!(open_archive(&path, None).unwrap().is_empty());
    }
}
