//! Aspects and their groups, briefcases and collections.

use super::Vault;
use crate::catalog::MetadataStore;
use crate::error::{Error, Result};
use crate::model::{
    Aspect, AspectGroup, AspectGroupId, AspectId, Briefcase, BriefcaseId, Collection,
    CollectionId, EntityKind, FileId, Taggable, GLOBAL_BRIEFCASE_ID,
};
use crate::validate;

impl Vault {
    // ---- aspects ----

    /// Creates the aspect in the root aspect group.
    pub fn create_aspect(&self, name: &str, description: &str) -> Result<AspectId> {
        validate::aspect(&self.config.limits, Some(name), Some(description))?;
        self.catalog.create_aspect(name, description)
    }

    pub fn create_aspect_in_group(
        &self,
        group: AspectGroupId,
        name: &str,
        description: &str,
    ) -> Result<AspectId> {
        validate::aspect(&self.config.limits, Some(name), Some(description))?;
        self.catalog.create_aspect_in(group, name, description)
    }

    pub fn aspect(&self, id: AspectId) -> Result<Aspect> {
        self.catalog.aspect(id)
    }

    pub fn aspects(&self) -> Result<Vec<Aspect>> {
        self.catalog.aspects()
    }

    pub fn rename_aspect(&self, id: AspectId, name: &str) -> Result<()> {
        validate::aspect(&self.config.limits, Some(name), None)?;
        self.catalog.update_aspect(id, Some(name), None)?;
        Ok(())
    }

    pub fn describe_aspect(&self, id: AspectId, description: &str) -> Result<()> {
        validate::aspect(&self.config.limits, None, Some(description))?;
        self.catalog.update_aspect(id, None, Some(description))?;
        Ok(())
    }

    /// Also unapplies the aspect from every file, url and note.
    pub fn delete_aspect(&self, id: AspectId) -> Result<()> {
        self.catalog.delete_aspect(id)
    }

    pub fn aspect_exists(&self, id: AspectId) -> Result<bool> {
        self.catalog.exists(EntityKind::Aspect, id)
    }

    pub fn aspect_name_exists(&self, name: &str) -> Result<bool> {
        Ok(self.catalog.aspect_by_name(name)?.is_some())
    }

    pub fn aspect_id(&self, name: &str) -> Result<AspectId> {
        self.catalog
            .aspect_by_name(name)?
            .map(|a| a.id)
            .ok_or_else(|| Error::NonExistentResource(format!("aspect {name:?}")))
    }

    /// Returns false when the aspect was already applied.
    pub fn apply_aspect(&self, aspect: AspectId, target: Taggable, item: u64) -> Result<bool> {
        self.catalog.apply_aspect(aspect, target, item)
    }

    /// All or nothing: an unknown item leaves every tag as it was. Returns how many
    /// items were newly tagged.
    pub fn apply_aspect_to_all(&self, aspect: AspectId, target: Taggable, items: &[u64]) -> Result<usize> {
        self.catalog.apply_aspect_to_all(aspect, target, items)
    }

    pub fn unapply_aspect(&self, aspect: AspectId, target: Taggable, item: u64) -> Result<bool> {
        self.catalog.unapply_aspect(aspect, target, item)
    }

    /// All or nothing, like [`Vault::apply_aspect_to_all`].
    pub fn unapply_aspect_from_all(
        &self,
        aspect: AspectId,
        target: Taggable,
        items: &[u64],
    ) -> Result<usize> {
        self.catalog.unapply_aspect_from_all(aspect, target, items)
    }

    /// Strip every aspect from one item.
    pub fn unapply_all_aspects(&self, target: Taggable, item: u64) -> Result<usize> {
        self.catalog.unapply_all_aspects(target, item)
    }

    pub fn is_aspect_applied(&self, aspect: AspectId, target: Taggable, item: u64) -> Result<bool> {
        self.catalog.is_aspect_applied(aspect, target, item)
    }

    pub fn aspects_on(&self, target: Taggable, item: u64) -> Result<Vec<AspectId>> {
        self.catalog.aspects_on(target, item)
    }

    pub fn items_with_aspect(&self, aspect: AspectId, target: Taggable) -> Result<Vec<u64>> {
        self.catalog.items_with_aspect(aspect, target)
    }

    // ---- aspect groups ----

    pub fn create_aspect_group(
        &self,
        parent: AspectGroupId,
        name: &str,
        description: &str,
    ) -> Result<AspectGroupId> {
        validate::aspect_group(&self.config.limits, Some(name), Some(description))?;
        self.catalog.create_aspect_group(parent, name, description)
    }

    pub fn aspect_group(&self, id: AspectGroupId) -> Result<AspectGroup> {
        self.catalog.aspect_group(id)
    }

    pub fn aspect_group_exists(&self, id: AspectGroupId) -> Result<bool> {
        self.catalog.exists(EntityKind::AspectGroup, id)
    }

    /// Whether `parent` already has a child group called `name`.
    pub fn aspect_group_exists_at_level(&self, parent: AspectGroupId, name: &str) -> Result<bool> {
        self.catalog.aspect_group_exists_at_level(parent, name)
    }

    pub fn rename_aspect_group(&self, id: AspectGroupId, name: &str) -> Result<()> {
        validate::aspect_group(&self.config.limits, Some(name), None)?;
        self.catalog.update_aspect_group(id, Some(name), None)?;
        Ok(())
    }

    pub fn describe_aspect_group(&self, id: AspectGroupId, description: &str) -> Result<()> {
        validate::aspect_group(&self.config.limits, None, Some(description))?;
        self.catalog.update_aspect_group(id, None, Some(description))?;
        Ok(())
    }

    pub fn child_aspect_groups(&self, parent: AspectGroupId) -> Result<Vec<AspectGroupId>> {
        self.catalog.child_aspect_groups(parent)
    }

    pub fn aspects_in_group(&self, group: AspectGroupId) -> Result<Vec<AspectId>> {
        self.catalog.aspects_in_group(group)
    }

    pub fn aspect_count_in_group(&self, group: AspectGroupId) -> Result<usize> {
        Ok(self.aspects_in_group(group)?.len())
    }

    pub fn aspect_group_count_in_group(&self, group: AspectGroupId) -> Result<usize> {
        Ok(self.child_aspect_groups(group)?.len())
    }

    pub fn move_aspect_to_group(&self, aspect: AspectId, group: AspectGroupId) -> Result<()> {
        self.catalog.move_aspect(aspect, group)
    }

    /// Fails with `IllegalOperation` for the root group or one that is not empty.
    pub fn delete_aspect_group(&self, id: AspectGroupId) -> Result<()> {
        self.catalog.delete_aspect_group(id)
    }

    // ---- briefcases ----

    pub fn create_briefcase(&self, name: &str, description: &str) -> Result<BriefcaseId> {
        validate::briefcase(&self.config.limits, Some(name), Some(description))?;
        self.catalog.create_briefcase(name, description)
    }

    pub fn briefcase(&self, id: BriefcaseId) -> Result<Briefcase> {
        self.catalog.briefcase(id)
    }

    pub fn briefcases(&self) -> Result<Vec<Briefcase>> {
        self.catalog.briefcases()
    }

    pub fn rename_briefcase(&self, id: BriefcaseId, name: &str) -> Result<()> {
        validate::briefcase(&self.config.limits, Some(name), None)?;
        self.catalog.update_briefcase(id, Some(name), None)?;
        Ok(())
    }

    pub fn describe_briefcase(&self, id: BriefcaseId, description: &str) -> Result<()> {
        validate::briefcase(&self.config.limits, None, Some(description))?;
        self.catalog.update_briefcase(id, None, Some(description))?;
        Ok(())
    }

    /// Fails with `IllegalOperation` for the global briefcase or one still holding files.
    pub fn delete_briefcase(&self, id: BriefcaseId) -> Result<()> {
        self.catalog.delete_briefcase(id)
    }

    pub fn briefcase_exists(&self, id: BriefcaseId) -> Result<bool> {
        self.catalog.exists(EntityKind::Briefcase, id)
    }

    pub fn briefcase_id(&self, name: &str) -> Result<BriefcaseId> {
        self.catalog
            .briefcase_by_name(name)?
            .map(|b| b.id)
            .ok_or_else(|| Error::NonExistentResource(format!("briefcase {name:?}")))
    }

    /// The briefcase currently holding a file.
    pub fn briefcase_of(&self, file: FileId) -> Result<BriefcaseId> {
        Ok(self.file(file)?.briefcase)
    }

    pub fn move_to_briefcase(&self, file: FileId, briefcase: BriefcaseId) -> Result<()> {
        self.catalog.move_file(file, briefcase)
    }

    /// Send a file back to the global briefcase.
    pub fn remove_from_briefcase(&self, file: FileId) -> Result<()> {
        self.catalog.move_file(file, GLOBAL_BRIEFCASE_ID)
    }

    pub fn files_in_briefcase(&self, id: BriefcaseId) -> Result<Vec<FileId>> {
        self.catalog.files_in_briefcase(id)
    }

    // ---- collections ----

    pub fn create_collection(&self, name: &str, description: &str) -> Result<CollectionId> {
        validate::collection(&self.config.limits, Some(name), Some(description))?;
        self.catalog.create_collection(name, description)
    }

    pub fn collection(&self, id: CollectionId) -> Result<Collection> {
        self.catalog.collection(id)
    }

    pub fn collections(&self) -> Result<Vec<Collection>> {
        self.catalog.collections()
    }

    pub fn rename_collection(&self, id: CollectionId, name: &str) -> Result<()> {
        validate::collection(&self.config.limits, Some(name), None)?;
        self.catalog.update_collection(id, Some(name), None)?;
        Ok(())
    }

    pub fn describe_collection(&self, id: CollectionId, description: &str) -> Result<()> {
        validate::collection(&self.config.limits, None, Some(description))?;
        self.catalog.update_collection(id, None, Some(description))?;
        Ok(())
    }

    pub fn delete_collection(&self, id: CollectionId) -> Result<()> {
        self.catalog.delete_collection(id)
    }

    pub fn collection_exists(&self, id: CollectionId) -> Result<bool> {
        self.catalog.exists(EntityKind::Collection, id)
    }

    pub fn collection_id(&self, name: &str) -> Result<CollectionId> {
        self.catalog
            .collection_by_name(name)?
            .map(|c| c.id)
            .ok_or_else(|| Error::NonExistentResource(format!("collection {name:?}")))
    }

    pub fn add_to_collection(&self, collection: CollectionId, file: FileId) -> Result<bool> {
        self.catalog.add_to_collection(collection, file)
    }

    /// All or nothing: an unknown file leaves the collection as it was. Returns how
    /// many files were newly added.
    pub fn add_all_to_collection(&self, collection: CollectionId, files: &[FileId]) -> Result<usize> {
        self.catalog.add_all_to_collection(collection, files)
    }

    pub fn remove_from_collection(&self, collection: CollectionId, file: FileId) -> Result<bool> {
        self.catalog.remove_from_collection(collection, file)
    }

    pub fn remove_all_from_collection(
        &self,
        collection: CollectionId,
        files: &[FileId],
    ) -> Result<usize> {
        self.catalog.remove_all_from_collection(collection, files)
    }

    pub fn is_in_collection(&self, collection: CollectionId, file: FileId) -> Result<bool> {
        self.catalog.is_in_collection(collection, file)
    }

    pub fn collections_with_file(&self, file: FileId) -> Result<Vec<CollectionId>> {
        self.catalog.collections_with_file(file)
    }

    pub fn files_in_collection(&self, collection: CollectionId) -> Result<Vec<FileId>> {
        self.catalog.files_in_collection(collection)
    }

    pub fn remove_from_all_collections(&self, file: FileId) -> Result<usize> {
        self.catalog.remove_from_all_collections(file)
    }

    /// Empty a collection, keeping the collection itself.
    pub fn clear_collection(&self, collection: CollectionId) -> Result<usize> {
        self.catalog.clear_collection(collection)
    }
}
