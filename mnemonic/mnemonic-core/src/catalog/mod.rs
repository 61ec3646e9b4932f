//! Metadata about files, versions and groupings
//!
//! [`MetadataStore`] is the narrow contract the version chain, the archive builder and
//! duplicate detection depend on. [`JsonCatalog`] implements it and adds the grouping
//! CRUD the vault exposes.

mod json;

pub use json::JsonCatalog;
pub(crate) use json::{load_json, write_json_atomic};

use crate::error::Result;
use crate::model::{EntityKind, FileId, FileRecord, GroupingKind, NewFile, VersionRecord};

pub trait MetadataStore: Send + Sync {
    /// File ids belonging to a grouping, ascending.
    fn resolve_grouping_members(&self, kind: GroupingKind, id: u64) -> Result<Vec<FileId>>;

    fn file_record(&self, id: FileId) -> Result<FileRecord>;

    /// Every file, the pool for duplicate detection.
    fn file_records(&self) -> Result<Vec<FileRecord>>;

    fn last_version_number(&self, id: FileId) -> Result<u32>;

    /// Record for a checked-in version, `1..=last`.
    fn version_record(&self, id: FileId, version: u32) -> Result<VersionRecord>;

    /// Append a version. Fails with `VersionConflict` unless `record.version == last + 1`.
    fn record_version(&self, record: VersionRecord) -> Result<()>;

    fn record_save(&self, file: NewFile) -> Result<FileId>;

    fn exists(&self, kind: EntityKind, id: u64) -> Result<bool>;
}
