use chrono::Utc;
use fs4::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::MetadataStore;
use crate::error::{Error, Result};
use crate::model::{
    Aspect, AspectGroup, AspectGroupId, AspectId, Briefcase, BriefcaseId, Collection,
    CollectionId, EntityKind, FileId, FileRecord, GroupingKind, NewFile, Note, NoteId, Taggable,
    UrlId, UrlRecord, VersionRecord, GLOBAL_BRIEFCASE_ID, ROOT_ASPECT_GROUP_ID,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counters {
    file: u64,
    aspect: u64,
    #[serde(default)]
    aspect_group: u64,
    briefcase: u64,
    collection: u64,
    url: u64,
    note: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogState {
    #[serde(default)]
    counters: Counters,
    #[serde(default)]
    files: BTreeMap<FileId, FileRecord>,
    #[serde(default)]
    versions: BTreeMap<FileId, Vec<VersionRecord>>,
    #[serde(default)]
    aspects: BTreeMap<AspectId, Aspect>,
    #[serde(default)]
    aspect_groups: BTreeMap<AspectGroupId, AspectGroup>,
    #[serde(default)]
    briefcases: BTreeMap<BriefcaseId, Briefcase>,
    #[serde(default)]
    collections: BTreeMap<CollectionId, Collection>,
    #[serde(default)]
    urls: BTreeMap<UrlId, UrlRecord>,
    #[serde(default)]
    notes: BTreeMap<NoteId, Note>,
    // (aspect, item) pairs
    #[serde(default)]
    file_aspects: BTreeSet<(AspectId, FileId)>,
    #[serde(default)]
    url_aspects: BTreeSet<(AspectId, UrlId)>,
    #[serde(default)]
    note_aspects: BTreeSet<(AspectId, NoteId)>,
    // (collection, file) pairs
    #[serde(default)]
    collection_files: BTreeSet<(CollectionId, FileId)>,
}

impl CatalogState {
    fn fresh() -> Self {
        let mut state = Self::default();
        state.ensure_root_aspect_group();
        state.counters.briefcase = GLOBAL_BRIEFCASE_ID;
        state.briefcases.insert(
            GLOBAL_BRIEFCASE_ID,
            Briefcase {
                id: GLOBAL_BRIEFCASE_ID,
                name: "Global".to_string(),
                description: "Default briefcase".to_string(),
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Catalogs written before aspect groups existed gain the root on load.
    fn ensure_root_aspect_group(&mut self) {
        if self.aspect_groups.contains_key(&ROOT_ASPECT_GROUP_ID) {
            return;
        }
        self.counters.aspect_group = self.counters.aspect_group.max(ROOT_ASPECT_GROUP_ID);
        self.aspect_groups.insert(
            ROOT_ASPECT_GROUP_ID,
            AspectGroup {
                id: ROOT_ASPECT_GROUP_ID,
                parent: None,
                name: "Root".to_string(),
                description: "Top of the aspect group tree".to_string(),
            },
        );
    }

    fn child_groups(&self, parent: AspectGroupId) -> impl Iterator<Item = &AspectGroup> {
        self.aspect_groups
            .values()
            .filter(move |g| g.parent == Some(parent))
    }

    fn tags(&self, target: Taggable) -> &BTreeSet<(AspectId, u64)> {
        match target {
            Taggable::File => &self.file_aspects,
            Taggable::Url => &self.url_aspects,
            Taggable::Note => &self.note_aspects,
        }
    }

    fn tags_mut(&mut self, target: Taggable) -> &mut BTreeSet<(AspectId, u64)> {
        match target {
            Taggable::File => &mut self.file_aspects,
            Taggable::Url => &mut self.url_aspects,
            Taggable::Note => &mut self.note_aspects,
        }
    }

    fn contains(&self, kind: EntityKind, id: u64) -> bool {
        match kind {
            EntityKind::File => self.files.contains_key(&id),
            EntityKind::Aspect => self.aspects.contains_key(&id),
            EntityKind::AspectGroup => self.aspect_groups.contains_key(&id),
            EntityKind::Briefcase => self.briefcases.contains_key(&id),
            EntityKind::Collection => self.collections.contains_key(&id),
            EntityKind::Url => self.urls.contains_key(&id),
            EntityKind::Note => self.notes.contains_key(&id),
        }
    }

    /// `InvalidArgument` for id 0, `NonExistentResource` for unknown ids.
    fn require(&self, kind: EntityKind, id: u64) -> Result<()> {
        if id == 0 {
            return Err(Error::invalid(format!("{kind} id must be non-zero")));
        }
        if !self.contains(kind, id) {
            return Err(Error::NonExistentResource(format!("{kind} {id}")));
        }
        Ok(())
    }

    fn file(&self, id: FileId) -> Result<&FileRecord> {
        self.require(EntityKind::File, id)?;
        self.files
            .get(&id)
            .ok_or_else(|| Error::missing("file", id))
    }

    fn file_mut(&mut self, id: FileId) -> Result<&mut FileRecord> {
        self.require(EntityKind::File, id)?;
        self.files
            .get_mut(&id)
            .ok_or_else(|| Error::missing("file", id))
    }

    /// Every id must exist before a bulk change touches anything.
    fn require_all(&self, kind: EntityKind, ids: &[u64]) -> Result<()> {
        ids.iter().try_for_each(|&id| self.require(kind, id))
    }

    fn members(set: &BTreeSet<(u64, u64)>, owner: u64) -> Vec<u64> {
        set.range((owner, 0)..=(owner, u64::MAX))
            .map(|(_, item)| *item)
            .collect()
    }

    fn owners(set: &BTreeSet<(u64, u64)>, item: u64) -> Vec<u64> {
        set.iter()
            .filter(|(_, i)| *i == item)
            .map(|(owner, _)| *owner)
            .collect()
    }
}

fn check_unique<'a>(
    mut names: impl Iterator<Item = (u64, &'a str)>,
    name: &str,
    except: Option<u64>,
    what: &str,
) -> Result<()> {
    if names.any(|(id, n)| n == name && Some(id) != except) {
        return Err(Error::DuplicateName(format!("{what} {name:?} already exists")));
    }
    Ok(())
}

/// Catalog persisted as one JSON document, rewritten atomically after every change.
///
/// Nothing is cached: reads parse the committed document and every mutation re-reads
/// it while holding an exclusive lock on a sibling `.lock` file, so several handles
/// on the same catalog, in one process or many, never work from stale state.
pub struct JsonCatalog {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<()>,
}

impl JsonCatalog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let catalog = Self {
            lock_path: path.with_extension("lock"),
            path,
            writer: Mutex::new(()),
        };

        let _lock = catalog.lock_file()?;
        if !catalog.path.exists() {
            write_json_atomic(&catalog.path, &CatalogState::fresh())?;
            debug!(path = %catalog.path.display(), "Created catalog");
        }
        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Held until the returned handle is dropped.
    fn lock_file(&self) -> Result<File> {
        if let Some(dir) = self.lock_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(file)
    }

    /// Writers replace the document by rename, so readers never see a partial one.
    fn load(&self) -> Result<CatalogState> {
        let mut state = load_json::<CatalogState>(&self.path)?.ok_or_else(|| {
            Error::corrupted(format!("catalog {} is missing", self.path.display()))
        })?;
        state.ensure_root_aspect_group();
        Ok(state)
    }

    fn read<T>(&self, f: impl FnOnce(&CatalogState) -> Result<T>) -> Result<T> {
        f(&self.load()?)
    }

    /// Apply `f` to the committed state and write the result; nothing is written when
    /// `f` fails.
    fn mutate<T>(&self, f: impl FnOnce(&mut CatalogState) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock();
        let _lock = self.lock_file()?;
        let mut state = self.load()?;
        let out = f(&mut state)?;
        write_json_atomic(&self.path, &state)?;
        Ok(out)
    }

    // ---- files ----

    pub fn update_file(&self, id: FileId, f: impl FnOnce(&mut FileRecord)) -> Result<FileRecord> {
        self.mutate(|state| {
            let record = state.file_mut(id)?;
            f(record);
            Ok(record.clone())
        })
    }

    /// Drop a file with its versions, aspects and collection memberships.
    pub fn remove_file(&self, id: FileId) -> Result<(FileRecord, Vec<VersionRecord>)> {
        self.mutate(|state| {
            state.require(EntityKind::File, id)?;
            let record = state
                .files
                .remove(&id)
                .ok_or_else(|| Error::missing("file", id))?;
            let versions = state.versions.remove(&id).unwrap_or_default();
            state.file_aspects.retain(|(_, file)| *file != id);
            state.collection_files.retain(|(_, file)| *file != id);
            Ok((record, versions))
        })
    }

    pub fn version_records(&self, id: FileId) -> Result<Vec<VersionRecord>> {
        self.read(|state| {
            state.require(EntityKind::File, id)?;
            Ok(state.versions.get(&id).cloned().unwrap_or_default())
        })
    }

    // ---- aspects ----

    pub fn create_aspect(&self, name: &str, description: &str) -> Result<AspectId> {
        self.create_aspect_in(ROOT_ASPECT_GROUP_ID, name, description)
    }

    pub fn create_aspect_in(
        &self,
        group: AspectGroupId,
        name: &str,
        description: &str,
    ) -> Result<AspectId> {
        self.mutate(|state| {
            state.require(EntityKind::AspectGroup, group)?;
            check_unique(
                state.aspects.values().map(|a| (a.id, a.name.as_str())),
                name,
                None,
                "aspect",
            )?;
            state.counters.aspect += 1;
            let id = state.counters.aspect;
            state.aspects.insert(
                id,
                Aspect {
                    id,
                    name: name.to_string(),
                    description: description.to_string(),
                    group,
                },
            );
            Ok(id)
        })
    }

    pub fn aspect(&self, id: AspectId) -> Result<Aspect> {
        self.read(|state| {
            state.require(EntityKind::Aspect, id)?;
            state
                .aspects
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::missing("aspect", id))
        })
    }

    pub fn aspects(&self) -> Result<Vec<Aspect>> {
        self.read(|state| Ok(state.aspects.values().cloned().collect()))
    }

    pub fn aspect_by_name(&self, name: &str) -> Result<Option<Aspect>> {
        self.read(|state| Ok(state.aspects.values().find(|a| a.name == name).cloned()))
    }

    pub fn update_aspect(
        &self,
        id: AspectId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Aspect> {
        self.mutate(|state| {
            state.require(EntityKind::Aspect, id)?;
            if let Some(name) = name {
                check_unique(
                    state.aspects.values().map(|a| (a.id, a.name.as_str())),
                    name,
                    Some(id),
                    "aspect",
                )?;
            }
            let aspect = state
                .aspects
                .get_mut(&id)
                .ok_or_else(|| Error::missing("aspect", id))?;
            if let Some(name) = name {
                aspect.name = name.to_string();
            }
            if let Some(description) = description {
                aspect.description = description.to_string();
            }
            Ok(aspect.clone())
        })
    }

    /// Delete an aspect and unapply it from every file, url and note.
    pub fn delete_aspect(&self, id: AspectId) -> Result<()> {
        self.mutate(|state| {
            state.require(EntityKind::Aspect, id)?;
            state.aspects.remove(&id);
            for target in [Taggable::File, Taggable::Url, Taggable::Note] {
                state.tags_mut(target).retain(|(aspect, _)| *aspect != id);
            }
            Ok(())
        })
    }

    /// Returns false when the aspect was already applied.
    pub fn apply_aspect(&self, aspect: AspectId, target: Taggable, item: u64) -> Result<bool> {
        self.mutate(|state| {
            state.require(EntityKind::Aspect, aspect)?;
            state.require(target.into(), item)?;
            Ok(state.tags_mut(target).insert((aspect, item)))
        })
    }

    /// Checks every item before tagging any; returns how many were newly tagged.
    pub fn apply_aspect_to_all(
        &self,
        aspect: AspectId,
        target: Taggable,
        items: &[u64],
    ) -> Result<usize> {
        self.mutate(|state| {
            state.require(EntityKind::Aspect, aspect)?;
            state.require_all(target.into(), items)?;
            let tags = state.tags_mut(target);
            Ok(items.iter().filter(|&&item| tags.insert((aspect, item))).count())
        })
    }

    /// Checks every item before untagging any; returns how many were untagged.
    pub fn unapply_aspect_from_all(
        &self,
        aspect: AspectId,
        target: Taggable,
        items: &[u64],
    ) -> Result<usize> {
        self.mutate(|state| {
            state.require(EntityKind::Aspect, aspect)?;
            state.require_all(target.into(), items)?;
            let tags = state.tags_mut(target);
            Ok(items.iter().filter(|&&item| tags.remove(&(aspect, item))).count())
        })
    }

    /// Returns false when the aspect was not applied.
    pub fn unapply_aspect(&self, aspect: AspectId, target: Taggable, item: u64) -> Result<bool> {
        self.mutate(|state| {
            state.require(EntityKind::Aspect, aspect)?;
            state.require(target.into(), item)?;
            Ok(state.tags_mut(target).remove(&(aspect, item)))
        })
    }

    pub fn unapply_all_aspects(&self, target: Taggable, item: u64) -> Result<usize> {
        self.mutate(|state| {
            state.require(target.into(), item)?;
            let tags = state.tags_mut(target);
            let before = tags.len();
            tags.retain(|(_, i)| *i != item);
            Ok(before - tags.len())
        })
    }

    pub fn is_aspect_applied(&self, aspect: AspectId, target: Taggable, item: u64) -> Result<bool> {
        self.read(|state| {
            state.require(EntityKind::Aspect, aspect)?;
            state.require(target.into(), item)?;
            Ok(state.tags(target).contains(&(aspect, item)))
        })
    }

    pub fn aspects_on(&self, target: Taggable, item: u64) -> Result<Vec<AspectId>> {
        self.read(|state| {
            state.require(target.into(), item)?;
            Ok(CatalogState::owners(state.tags(target), item))
        })
    }

    pub fn items_with_aspect(&self, aspect: AspectId, target: Taggable) -> Result<Vec<u64>> {
        self.read(|state| {
            state.require(EntityKind::Aspect, aspect)?;
            Ok(CatalogState::members(state.tags(target), aspect))
        })
    }

    pub fn move_aspect(&self, aspect: AspectId, group: AspectGroupId) -> Result<()> {
        self.mutate(|state| {
            state.require(EntityKind::AspectGroup, group)?;
            state.require(EntityKind::Aspect, aspect)?;
            if let Some(aspect) = state.aspects.get_mut(&aspect) {
                aspect.group = group;
            }
            Ok(())
        })
    }

    pub fn aspects_in_group(&self, group: AspectGroupId) -> Result<Vec<AspectId>> {
        self.read(|state| {
            state.require(EntityKind::AspectGroup, group)?;
            Ok(state
                .aspects
                .values()
                .filter(|a| a.group == group)
                .map(|a| a.id)
                .collect())
        })
    }

    // ---- aspect groups ----

    /// Names are unique among the children of one parent.
    pub fn create_aspect_group(
        &self,
        parent: AspectGroupId,
        name: &str,
        description: &str,
    ) -> Result<AspectGroupId> {
        self.mutate(|state| {
            state.require(EntityKind::AspectGroup, parent)?;
            check_unique(
                state.child_groups(parent).map(|g| (g.id, g.name.as_str())),
                name,
                None,
                "aspect group",
            )?;
            state.counters.aspect_group += 1;
            let id = state.counters.aspect_group;
            state.aspect_groups.insert(
                id,
                AspectGroup {
                    id,
                    parent: Some(parent),
                    name: name.to_string(),
                    description: description.to_string(),
                },
            );
            Ok(id)
        })
    }

    pub fn aspect_group(&self, id: AspectGroupId) -> Result<AspectGroup> {
        self.read(|state| {
            state.require(EntityKind::AspectGroup, id)?;
            state
                .aspect_groups
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::missing("aspect group", id))
        })
    }

    pub fn aspect_group_exists_at_level(&self, parent: AspectGroupId, name: &str) -> Result<bool> {
        self.read(|state| {
            state.require(EntityKind::AspectGroup, parent)?;
            Ok(state.child_groups(parent).any(|g| g.name == name))
        })
    }

    pub fn child_aspect_groups(&self, parent: AspectGroupId) -> Result<Vec<AspectGroupId>> {
        self.read(|state| {
            state.require(EntityKind::AspectGroup, parent)?;
            Ok(state.child_groups(parent).map(|g| g.id).collect())
        })
    }

    pub fn update_aspect_group(
        &self,
        id: AspectGroupId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<AspectGroup> {
        self.mutate(|state| {
            state.require(EntityKind::AspectGroup, id)?;
            let parent = state.aspect_groups.get(&id).and_then(|g| g.parent);
            if let (Some(name), Some(parent)) = (name, parent) {
                check_unique(
                    state.child_groups(parent).map(|g| (g.id, g.name.as_str())),
                    name,
                    Some(id),
                    "aspect group",
                )?;
            }
            let group = state
                .aspect_groups
                .get_mut(&id)
                .ok_or_else(|| Error::missing("aspect group", id))?;
            if let Some(name) = name {
                group.name = name.to_string();
            }
            if let Some(description) = description {
                group.description = description.to_string();
            }
            Ok(group.clone())
        })
    }

    /// The root and groups still holding aspects or child groups cannot be deleted.
    pub fn delete_aspect_group(&self, id: AspectGroupId) -> Result<()> {
        self.mutate(|state| {
            if id == ROOT_ASPECT_GROUP_ID {
                return Err(Error::IllegalOperation(
                    "the root aspect group cannot be deleted".to_string(),
                ));
            }
            state.require(EntityKind::AspectGroup, id)?;
            let aspects = state.aspects.values().filter(|a| a.group == id).count();
            let children = state.child_groups(id).count();
            if aspects + children > 0 {
                return Err(Error::IllegalOperation(format!(
                    "aspect group {id} still holds {aspects} aspects and {children} groups"
                )));
            }
            state.aspect_groups.remove(&id);
            Ok(())
        })
    }

    // ---- briefcases ----

    pub fn create_briefcase(&self, name: &str, description: &str) -> Result<BriefcaseId> {
        self.mutate(|state| {
            check_unique(
                state.briefcases.values().map(|b| (b.id, b.name.as_str())),
                name,
                None,
                "briefcase",
            )?;
            state.counters.briefcase += 1;
            let id = state.counters.briefcase;
            state.briefcases.insert(
                id,
                Briefcase {
                    id,
                    name: name.to_string(),
                    description: description.to_string(),
                    created_at: Utc::now(),
                },
            );
            Ok(id)
        })
    }

    pub fn briefcase(&self, id: BriefcaseId) -> Result<Briefcase> {
        self.read(|state| {
            state.require(EntityKind::Briefcase, id)?;
            state
                .briefcases
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::missing("briefcase", id))
        })
    }

    pub fn briefcases(&self) -> Result<Vec<Briefcase>> {
        self.read(|state| Ok(state.briefcases.values().cloned().collect()))
    }

    pub fn briefcase_by_name(&self, name: &str) -> Result<Option<Briefcase>> {
        self.read(|state| Ok(state.briefcases.values().find(|b| b.name == name).cloned()))
    }

    pub fn update_briefcase(
        &self,
        id: BriefcaseId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Briefcase> {
        self.mutate(|state| {
            state.require(EntityKind::Briefcase, id)?;
            if let Some(name) = name {
                check_unique(
                    state.briefcases.values().map(|b| (b.id, b.name.as_str())),
                    name,
                    Some(id),
                    "briefcase",
                )?;
            }
            let briefcase = state
                .briefcases
                .get_mut(&id)
                .ok_or_else(|| Error::missing("briefcase", id))?;
            if let Some(name) = name {
                briefcase.name = name.to_string();
            }
            if let Some(description) = description {
                briefcase.description = description.to_string();
            }
            Ok(briefcase.clone())
        })
    }

    /// The global briefcase and briefcases still holding files cannot be deleted.
    pub fn delete_briefcase(&self, id: BriefcaseId) -> Result<()> {
        self.mutate(|state| {
            if id == GLOBAL_BRIEFCASE_ID {
                return Err(Error::IllegalOperation(
                    "the global briefcase cannot be deleted".to_string(),
                ));
            }
            state.require(EntityKind::Briefcase, id)?;
            if state.files.values().any(|f| f.briefcase == id) {
                return Err(Error::IllegalOperation(format!(
                    "briefcase {id} still holds files"
                )));
            }
            state.briefcases.remove(&id);
            Ok(())
        })
    }

    pub fn move_file(&self, file: FileId, briefcase: BriefcaseId) -> Result<()> {
        self.mutate(|state| {
            state.require(EntityKind::Briefcase, briefcase)?;
            state.file_mut(file)?.briefcase = briefcase;
            Ok(())
        })
    }

    pub fn files_in_briefcase(&self, id: BriefcaseId) -> Result<Vec<FileId>> {
        self.read(|state| {
            state.require(EntityKind::Briefcase, id)?;
            Ok(state
                .files
                .values()
                .filter(|f| f.briefcase == id)
                .map(|f| f.id)
                .collect())
        })
    }

    // ---- collections ----

    pub fn create_collection(&self, name: &str, description: &str) -> Result<CollectionId> {
        self.mutate(|state| {
            check_unique(
                state.collections.values().map(|c| (c.id, c.name.as_str())),
                name,
                None,
                "collection",
            )?;
            state.counters.collection += 1;
            let id = state.counters.collection;
            state.collections.insert(
                id,
                Collection {
                    id,
                    name: name.to_string(),
                    description: description.to_string(),
                    created_at: Utc::now(),
                },
            );
            Ok(id)
        })
    }

    pub fn collection(&self, id: CollectionId) -> Result<Collection> {
        self.read(|state| {
            state.require(EntityKind::Collection, id)?;
            state
                .collections
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::missing("collection", id))
        })
    }

    pub fn collections(&self) -> Result<Vec<Collection>> {
        self.read(|state| Ok(state.collections.values().cloned().collect()))
    }

    pub fn collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        self.read(|state| Ok(state.collections.values().find(|c| c.name == name).cloned()))
    }

    pub fn update_collection(
        &self,
        id: CollectionId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Collection> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, id)?;
            if let Some(name) = name {
                check_unique(
                    state.collections.values().map(|c| (c.id, c.name.as_str())),
                    name,
                    Some(id),
                    "collection",
                )?;
            }
            let collection = state
                .collections
                .get_mut(&id)
                .ok_or_else(|| Error::missing("collection", id))?;
            if let Some(name) = name {
                collection.name = name.to_string();
            }
            if let Some(description) = description {
                collection.description = description.to_string();
            }
            Ok(collection.clone())
        })
    }

    pub fn delete_collection(&self, id: CollectionId) -> Result<()> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, id)?;
            state.collections.remove(&id);
            state.collection_files.retain(|(c, _)| *c != id);
            Ok(())
        })
    }

    /// Returns false when the file was already in the collection.
    pub fn add_to_collection(&self, collection: CollectionId, file: FileId) -> Result<bool> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, collection)?;
            state.require(EntityKind::File, file)?;
            Ok(state.collection_files.insert((collection, file)))
        })
    }

    /// Checks every file before adding any; returns how many were newly added.
    pub fn add_all_to_collection(&self, collection: CollectionId, files: &[FileId]) -> Result<usize> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, collection)?;
            state.require_all(EntityKind::File, files)?;
            Ok(files
                .iter()
                .filter(|&&file| state.collection_files.insert((collection, file)))
                .count())
        })
    }

    /// Checks every file before removing any; returns how many were removed.
    pub fn remove_all_from_collection(
        &self,
        collection: CollectionId,
        files: &[FileId],
    ) -> Result<usize> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, collection)?;
            state.require_all(EntityKind::File, files)?;
            Ok(files
                .iter()
                .filter(|&&file| state.collection_files.remove(&(collection, file)))
                .count())
        })
    }

    pub fn remove_from_collection(&self, collection: CollectionId, file: FileId) -> Result<bool> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, collection)?;
            state.require(EntityKind::File, file)?;
            Ok(state.collection_files.remove(&(collection, file)))
        })
    }

    pub fn is_in_collection(&self, collection: CollectionId, file: FileId) -> Result<bool> {
        self.read(|state| {
            state.require(EntityKind::Collection, collection)?;
            state.require(EntityKind::File, file)?;
            Ok(state.collection_files.contains(&(collection, file)))
        })
    }

    pub fn collections_with_file(&self, file: FileId) -> Result<Vec<CollectionId>> {
        self.read(|state| {
            state.require(EntityKind::File, file)?;
            Ok(CatalogState::owners(&state.collection_files, file))
        })
    }

    pub fn files_in_collection(&self, collection: CollectionId) -> Result<Vec<FileId>> {
        self.read(|state| {
            state.require(EntityKind::Collection, collection)?;
            Ok(CatalogState::members(&state.collection_files, collection))
        })
    }

    pub fn remove_from_all_collections(&self, file: FileId) -> Result<usize> {
        self.mutate(|state| {
            state.require(EntityKind::File, file)?;
            let before = state.collection_files.len();
            state.collection_files.retain(|(_, f)| *f != file);
            Ok(before - state.collection_files.len())
        })
    }

    pub fn clear_collection(&self, collection: CollectionId) -> Result<usize> {
        self.mutate(|state| {
            state.require(EntityKind::Collection, collection)?;
            let before = state.collection_files.len();
            state.collection_files.retain(|(c, _)| *c != collection);
            Ok(before - state.collection_files.len())
        })
    }

    // ---- urls and notes ----

    pub fn add_url(&self, url: &str, description: &str) -> Result<UrlId> {
        self.mutate(|state| {
            state.counters.url += 1;
            let id = state.counters.url;
            state.urls.insert(
                id,
                UrlRecord {
                    id,
                    url: url.to_string(),
                    description: description.to_string(),
                    added_at: Utc::now(),
                },
            );
            Ok(id)
        })
    }

    pub fn url(&self, id: UrlId) -> Result<UrlRecord> {
        self.read(|state| {
            state.require(EntityKind::Url, id)?;
            state.urls.get(&id).cloned().ok_or_else(|| Error::missing("url", id))
        })
    }

    pub fn urls(&self) -> Result<Vec<UrlRecord>> {
        self.read(|state| Ok(state.urls.values().cloned().collect()))
    }

    pub fn update_url(
        &self,
        id: UrlId,
        url: Option<&str>,
        description: Option<&str>,
    ) -> Result<UrlRecord> {
        self.mutate(|state| {
            state.require(EntityKind::Url, id)?;
            let record = state.urls.get_mut(&id).ok_or_else(|| Error::missing("url", id))?;
            if let Some(url) = url {
                record.url = url.to_string();
            }
            if let Some(description) = description {
                record.description = description.to_string();
            }
            Ok(record.clone())
        })
    }

    pub fn delete_url(&self, id: UrlId) -> Result<()> {
        self.mutate(|state| {
            state.require(EntityKind::Url, id)?;
            state.urls.remove(&id);
            state.url_aspects.retain(|(_, url)| *url != id);
            Ok(())
        })
    }

    pub fn add_note(&self, content: &str) -> Result<NoteId> {
        self.mutate(|state| {
            state.counters.note += 1;
            let id = state.counters.note;
            state.notes.insert(
                id,
                Note {
                    id,
                    content: content.to_string(),
                    added_at: Utc::now(),
                },
            );
            Ok(id)
        })
    }

    pub fn note(&self, id: NoteId) -> Result<Note> {
        self.read(|state| {
            state.require(EntityKind::Note, id)?;
            state.notes.get(&id).cloned().ok_or_else(|| Error::missing("note", id))
        })
    }

    pub fn notes(&self) -> Result<Vec<Note>> {
        self.read(|state| Ok(state.notes.values().cloned().collect()))
    }

    pub fn update_note(&self, id: NoteId, content: &str) -> Result<Note> {
        self.mutate(|state| {
            state.require(EntityKind::Note, id)?;
            let note = state.notes.get_mut(&id).ok_or_else(|| Error::missing("note", id))?;
            note.content = content.to_string();
            Ok(note.clone())
        })
    }

    pub fn delete_note(&self, id: NoteId) -> Result<()> {
        self.mutate(|state| {
            state.require(EntityKind::Note, id)?;
            state.notes.remove(&id);
            state.note_aspects.retain(|(_, note)| *note != id);
            Ok(())
        })
    }
}

impl MetadataStore for JsonCatalog {
    fn resolve_grouping_members(&self, kind: GroupingKind, id: u64) -> Result<Vec<FileId>> {
        match kind {
            GroupingKind::Aspect => self.items_with_aspect(id, Taggable::File),
            GroupingKind::Briefcase => self.files_in_briefcase(id),
            GroupingKind::Collection => self.files_in_collection(id),
        }
    }

    fn file_record(&self, id: FileId) -> Result<FileRecord> {
        self.read(|state| state.file(id).cloned())
    }

    fn file_records(&self) -> Result<Vec<FileRecord>> {
        self.read(|state| Ok(state.files.values().cloned().collect()))
    }

    fn last_version_number(&self, id: FileId) -> Result<u32> {
        self.read(|state| Ok(state.file(id)?.last_version))
    }

    fn version_record(&self, id: FileId, version: u32) -> Result<VersionRecord> {
        self.read(|state| {
            let last = state.file(id)?.last_version;
            if version == 0 || version > last {
                return Err(Error::IllegalVersion { requested: version, last });
            }
            state
                .versions
                .get(&id)
                .and_then(|versions| versions.iter().find(|v| v.version == version))
                .cloned()
                .ok_or_else(|| {
                    Error::corrupted(format!("file {id} has no record for version {version}"))
                })
        })
    }

    fn record_version(&self, record: VersionRecord) -> Result<()> {
        self.mutate(|state| {
            let file = state.file_mut(record.file_id)?;
            if record.version != file.last_version + 1 {
                return Err(Error::VersionConflict {
                    claimed: record.version.saturating_sub(1),
                    actual: file.last_version,
                });
            }
            file.last_version = record.version;
            state.versions.entry(record.file_id).or_default().push(record);
            Ok(())
        })
    }

    fn record_save(&self, file: NewFile) -> Result<FileId> {
        self.mutate(|state| {
            state.counters.file += 1;
            let id = state.counters.file;
            state.files.insert(
                id,
                FileRecord {
                    id,
                    name: file.name,
                    narration: file.narration,
                    size: file.size,
                    hash: file.hash,
                    location: file.location,
                    password: file.password,
                    saved_at: file.saved_at,
                    deleted_at: None,
                    last_version: 0,
                    briefcase: GLOBAL_BRIEFCASE_ID,
                },
            );
            Ok(id)
        })
    }

    fn exists(&self, kind: EntityKind, id: u64) -> Result<bool> {
        if id == 0 {
            return Err(Error::invalid(format!("{kind} id must be non-zero")));
        }
        self.read(|state| Ok(state.contains(kind, id)))
    }
}

/// `None` when the file does not exist yet.
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temporary sibling and rename over the target.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut temp_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        temp_file.write_all(&data)?;
        temp_file.sync_all()?;
    }
    std::fs::rename(temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobLocation, StoragePath};
    use tempfile::TempDir;

    fn new_file(name: &str) -> NewFile {
        NewFile {
            name: name.to_string(),
            narration: String::new(),
            size: 1,
            hash: "h".to_string(),
            location: BlobLocation {
                assumed_name: "e".to_string(),
                archive_name: "a.mfc".to_string(),
                directory: StoragePath::parse("b/0/v0").unwrap(),
            },
            password: "pw".to_string(),
            saved_at: Utc::now(),
        }
    }

    fn version(file_id: FileId, version: u32) -> VersionRecord {
        VersionRecord {
            file_id,
            version,
            comment: format!("v{version}"),
            hash: "h2".to_string(),
            directory: StoragePath::parse(&format!("b/0/v{version}")).unwrap(),
            checked_in_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_catalog_has_global_briefcase() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        let global = catalog.briefcase(GLOBAL_BRIEFCASE_ID).unwrap();
        assert_eq!(global.name, "Global");
        assert!(matches!(
            catalog.delete_briefcase(GLOBAL_BRIEFCASE_ID),
            Err(Error::IllegalOperation(_))
        ));
        // first user briefcase gets the next id
        assert_eq!(catalog.create_briefcase("work", "").unwrap(), 2);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let (file, aspect) = {
            let catalog = JsonCatalog::open(&path).unwrap();
            let file = catalog.record_save(new_file("a.txt")).unwrap();
            let aspect = catalog.create_aspect("red", "warm").unwrap();
            catalog.apply_aspect(aspect, Taggable::File, file).unwrap();
            catalog.record_version(version(file, 1)).unwrap();
            (file, aspect)
        };

        let catalog = JsonCatalog::open(&path).unwrap();
        assert_eq!(catalog.file_record(file).unwrap().name, "a.txt");
        assert_eq!(catalog.last_version_number(file).unwrap(), 1);
        assert_eq!(catalog.items_with_aspect(aspect, Taggable::File).unwrap(), vec![file]);
        assert_eq!(catalog.record_save(new_file("b.txt")).unwrap(), file + 1);
    }

    #[test]
    fn record_version_requires_contiguity() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        let file = catalog.record_save(new_file("a")).unwrap();

        assert!(matches!(
            catalog.record_version(version(file, 2)),
            Err(Error::VersionConflict { claimed: 1, actual: 0 })
        ));
        catalog.record_version(version(file, 1)).unwrap();
        assert!(matches!(
            catalog.record_version(version(file, 1)),
            Err(Error::VersionConflict { claimed: 0, actual: 1 })
        ));
        assert_eq!(catalog.version_record(file, 1).unwrap().comment, "v1");
        assert!(matches!(
            catalog.version_record(file, 2),
            Err(Error::IllegalVersion { requested: 2, last: 1 })
        ));
    }

    #[test]
    fn failed_mutation_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        catalog.create_aspect("red", "").unwrap();
        let blue = catalog.create_aspect("blue", "").unwrap();

        assert!(matches!(
            catalog.update_aspect(blue, Some("red"), Some("changed")),
            Err(Error::DuplicateName(_))
        ));
        assert_eq!(catalog.aspect(blue).unwrap().description, "");
        assert!(matches!(catalog.create_aspect("red", ""), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn ids_are_validated() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();

        assert!(matches!(catalog.file_record(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(catalog.file_record(9), Err(Error::NonExistentResource(_))));
        assert!(matches!(catalog.exists(EntityKind::Note, 0), Err(Error::InvalidArgument(_))));
        assert!(!catalog.exists(EntityKind::Note, 3).unwrap());
        assert!(matches!(
            catalog.resolve_grouping_members(GroupingKind::Collection, 4),
            Err(Error::NonExistentResource(_))
        ));
    }

    #[test]
    fn grouping_membership() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        let a = catalog.record_save(new_file("a")).unwrap();
        let b = catalog.record_save(new_file("b")).unwrap();

        let briefcase = catalog.create_briefcase("work", "").unwrap();
        catalog.move_file(b, briefcase).unwrap();
        assert_eq!(
            catalog.resolve_grouping_members(GroupingKind::Briefcase, GLOBAL_BRIEFCASE_ID).unwrap(),
            vec![a]
        );
        assert!(matches!(catalog.delete_briefcase(briefcase), Err(Error::IllegalOperation(_))));
        catalog.move_file(b, GLOBAL_BRIEFCASE_ID).unwrap();
        catalog.delete_briefcase(briefcase).unwrap();

        let collection = catalog.create_collection("pics", "").unwrap();
        assert!(catalog.add_to_collection(collection, b).unwrap());
        assert!(!catalog.add_to_collection(collection, b).unwrap());
        catalog.add_to_collection(collection, a).unwrap();
        assert_eq!(
            catalog.resolve_grouping_members(GroupingKind::Collection, collection).unwrap(),
            vec![a, b]
        );
        assert_eq!(catalog.collections_with_file(a).unwrap(), vec![collection]);

        let (_, versions) = catalog.remove_file(a).unwrap();
        assert!(versions.is_empty());
        assert_eq!(catalog.files_in_collection(collection).unwrap(), vec![b]);
    }

    #[test]
    fn aspects_on_urls_and_notes() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        let aspect = catalog.create_aspect("todo", "").unwrap();
        let url = catalog.add_url("https://example.org", "home").unwrap();
        let note = catalog.add_note("call back").unwrap();

        catalog.apply_aspect(aspect, Taggable::Url, url).unwrap();
        catalog.apply_aspect(aspect, Taggable::Note, note).unwrap();
        assert!(catalog.is_aspect_applied(aspect, Taggable::Url, url).unwrap());
        assert_eq!(catalog.aspects_on(Taggable::Note, note).unwrap(), vec![aspect]);
        assert!(matches!(
            catalog.apply_aspect(aspect, Taggable::Url, 42),
            Err(Error::NonExistentResource(_))
        ));

        catalog.delete_aspect(aspect).unwrap();
        assert!(catalog.aspects_on(Taggable::Url, url).unwrap().is_empty());
        catalog.delete_note(note).unwrap();
        assert!(matches!(catalog.note(note), Err(Error::NonExistentResource(_))));
    }

    #[test]
    fn handles_on_one_file_share_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let first = JsonCatalog::open(&path).unwrap();
        let second = JsonCatalog::open(&path).unwrap();

        let a = first.record_save(new_file("a")).unwrap();
        let b = second.record_save(new_file("b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(second.file_record(a).unwrap().name, "a");

        second.record_version(version(a, 1)).unwrap();
        assert_eq!(first.last_version_number(a).unwrap(), 1);
        assert!(matches!(
            first.record_version(version(a, 1)),
            Err(Error::VersionConflict { claimed: 0, actual: 1 })
        ));
        // the losing write must not roll back the winner's record
        assert_eq!(second.version_records(a).unwrap().len(), 1);
        assert_eq!(first.file_record(b).unwrap().name, "b");
    }

    #[test]
    fn bulk_changes_are_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        let a = catalog.record_save(new_file("a")).unwrap();
        let b = catalog.record_save(new_file("b")).unwrap();
        let aspect = catalog.create_aspect("red", "").unwrap();
        let collection = catalog.create_collection("pics", "").unwrap();

        assert!(matches!(
            catalog.apply_aspect_to_all(aspect, Taggable::File, &[a, 999]),
            Err(Error::NonExistentResource(_))
        ));
        assert!(catalog.items_with_aspect(aspect, Taggable::File).unwrap().is_empty());
        assert!(matches!(
            catalog.add_all_to_collection(collection, &[a, b, 0]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(catalog.files_in_collection(collection).unwrap().is_empty());

        assert_eq!(catalog.apply_aspect_to_all(aspect, Taggable::File, &[a, b, a]).unwrap(), 2);
        assert_eq!(catalog.add_all_to_collection(collection, &[a, b]).unwrap(), 2);
        assert!(catalog
            .unapply_aspect_from_all(aspect, Taggable::File, &[a, 999])
            .is_err());
        assert!(catalog.remove_all_from_collection(collection, &[b, 999]).is_err());
        assert_eq!(catalog.items_with_aspect(aspect, Taggable::File).unwrap(), vec![a, b]);
        assert_eq!(catalog.files_in_collection(collection).unwrap(), vec![a, b]);
    }

    #[test]
    fn aspect_group_tree() {
        let dir = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(dir.path().join("catalog.json")).unwrap();
        let root = catalog.aspect_group(ROOT_ASPECT_GROUP_ID).unwrap();
        assert_eq!(root.parent, None);

        let colours = catalog.create_aspect_group(ROOT_ASPECT_GROUP_ID, "colours", "").unwrap();
        let warm = catalog.create_aspect_group(colours, "warm", "").unwrap();
        // names repeat freely across levels
        catalog.create_aspect_group(ROOT_ASPECT_GROUP_ID, "warm", "").unwrap();
        assert!(matches!(
            catalog.create_aspect_group(colours, "warm", ""),
            Err(Error::DuplicateName(_))
        ));
        assert!(matches!(
            catalog.create_aspect_group(42, "x", ""),
            Err(Error::NonExistentResource(_))
        ));
        assert!(catalog.aspect_group_exists_at_level(colours, "warm").unwrap());
        assert_eq!(catalog.child_aspect_groups(colours).unwrap(), vec![warm]);

        let red = catalog.create_aspect_in(warm, "red", "").unwrap();
        assert_eq!(catalog.aspect(red).unwrap().group, warm);
        assert_eq!(catalog.aspects_in_group(warm).unwrap(), vec![red]);

        assert!(matches!(
            catalog.delete_aspect_group(ROOT_ASPECT_GROUP_ID),
            Err(Error::IllegalOperation(_))
        ));
        assert!(matches!(catalog.delete_aspect_group(colours), Err(Error::IllegalOperation(_))));
        assert!(matches!(catalog.delete_aspect_group(warm), Err(Error::IllegalOperation(_))));

        catalog.move_aspect(red, ROOT_ASPECT_GROUP_ID).unwrap();
        catalog.delete_aspect_group(warm).unwrap();
        catalog.delete_aspect_group(colours).unwrap();
        assert!(!catalog.exists(EntityKind::AspectGroup, colours).unwrap());
        assert_eq!(catalog.aspects_in_group(ROOT_ASPECT_GROUP_ID).unwrap(), vec![red]);
    }

    #[test]
    fn older_catalogs_gain_the_root_group() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"aspects": {"3": {"id": 3, "name": "old", "description": ""}}}"#,
        )
        .unwrap();

        let catalog = JsonCatalog::open(&path).unwrap();
        assert_eq!(catalog.aspect(3).unwrap().group, ROOT_ASPECT_GROUP_ID);
        assert_eq!(catalog.aspects_in_group(ROOT_ASPECT_GROUP_ID).unwrap(), vec![3]);
        let group = catalog.create_aspect_group(ROOT_ASPECT_GROUP_ID, "new", "").unwrap();
        assert_eq!(group, ROOT_ASPECT_GROUP_ID + 1);
    }
}
