use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::storage::{BlobLocation, StoragePath};

pub type FileId = u64;
pub type AspectId = u64;
pub type AspectGroupId = u64;
pub type BriefcaseId = u64;
pub type CollectionId = u64;
pub type UrlId = u64;
pub type NoteId = u64;
pub type StreamId = u64;

/// Every file starts out in this briefcase; it can never be deleted.
pub const GLOBAL_BRIEFCASE_ID: BriefcaseId = 1;

/// Top of the aspect group tree; it can never be deleted.
pub const ROOT_ASPECT_GROUP_ID: AspectGroupId = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    pub narration: String,
    pub size: u64,
    pub hash: String,
    pub location: BlobLocation,
    pub password: String,
    pub saved_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// 0 until the first check-in.
    pub last_version: u32,
    pub briefcase: BriefcaseId,
}

/// What a save hands to the catalog; the catalog assigns the id.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub narration: String,
    pub size: u64,
    pub hash: String,
    pub location: BlobLocation,
    pub password: String,
    pub saved_at: DateTime<Utc>,
}

/// One check-in. Version 0 is the file record itself and has no entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub file_id: FileId,
    pub version: u32,
    pub comment: String,
    pub hash: String,
    pub directory: StoragePath,
    pub checked_in_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    pub id: AspectId,
    pub name: String,
    pub description: String,
    #[serde(default = "root_aspect_group")]
    pub group: AspectGroupId,
}

fn root_aspect_group() -> AspectGroupId {
    ROOT_ASPECT_GROUP_ID
}

/// Node in the tree that organises aspects. Only the root has no parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectGroup {
    pub id: AspectGroupId,
    pub parent: Option<AspectGroupId>,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefcase {
    pub id: BriefcaseId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: UrlId,
    pub url: String,
    pub description: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    pub added_at: DateTime<Utc>,
}

/// A user-independent byte stream with an optional caller reference number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub id: StreamId,
    pub location: BlobLocation,
    pub reference: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupingKind {
    Aspect,
    Briefcase,
    Collection,
}

impl fmt::Display for GroupingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupingKind::Aspect => "aspect",
            GroupingKind::Briefcase => "briefcase",
            GroupingKind::Collection => "collection",
        })
    }
}

impl FromStr for GroupingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "aspect" => Ok(GroupingKind::Aspect),
            "briefcase" => Ok(GroupingKind::Briefcase),
            "collection" => Ok(GroupingKind::Collection),
            other => Err(Error::invalid(format!("unknown grouping kind {other:?}"))),
        }
    }
}

impl From<GroupingKind> for EntityKind {
    fn from(kind: GroupingKind) -> Self {
        match kind {
            GroupingKind::Aspect => EntityKind::Aspect,
            GroupingKind::Briefcase => EntityKind::Briefcase,
            GroupingKind::Collection => EntityKind::Collection,
        }
    }
}

/// Anything the catalog can answer an existence query for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    File,
    Aspect,
    AspectGroup,
    Briefcase,
    Collection,
    Url,
    Note,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::File => "file",
            EntityKind::Aspect => "aspect",
            EntityKind::AspectGroup => "aspect group",
            EntityKind::Briefcase => "briefcase",
            EntityKind::Collection => "collection",
            EntityKind::Url => "url",
            EntityKind::Note => "note",
        })
    }
}

/// How aspect membership combines in `filter_files_within_aspects`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Files carrying every aspect.
    And,
    /// Files carrying at least one aspect.
    Or,
}

/// Items an aspect can be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Taggable {
    File,
    Url,
    Note,
}

impl From<Taggable> for EntityKind {
    fn from(target: Taggable) -> Self {
        match target {
            Taggable::File => EntityKind::File,
            Taggable::Url => EntityKind::Url,
            Taggable::Note => EntityKind::Note,
        }
    }
}
