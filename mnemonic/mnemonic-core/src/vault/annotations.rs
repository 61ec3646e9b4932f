//! Urls and notes kept beside the files.

use super::Vault;
use crate::catalog::MetadataStore;
use crate::error::Result;
use crate::model::{EntityKind, Note, NoteId, UrlId, UrlRecord};
use crate::validate;

impl Vault {
    pub fn add_url(&self, url: &str, description: &str) -> Result<UrlId> {
        validate::url(&self.config.limits, url)?;
        self.catalog.add_url(url, description)
    }

    pub fn url(&self, id: UrlId) -> Result<UrlRecord> {
        self.catalog.url(id)
    }

    pub fn urls(&self) -> Result<Vec<UrlRecord>> {
        self.catalog.urls()
    }

    pub fn update_url(&self, id: UrlId, url: Option<&str>, description: Option<&str>) -> Result<UrlRecord> {
        if let Some(url) = url {
            validate::url(&self.config.limits, url)?;
        }
        self.catalog.update_url(id, url, description)
    }

    pub fn delete_url(&self, id: UrlId) -> Result<()> {
        self.catalog.delete_url(id)
    }

    pub fn url_exists(&self, id: UrlId) -> Result<bool> {
        self.catalog.exists(EntityKind::Url, id)
    }

    pub fn add_note(&self, content: &str) -> Result<NoteId> {
        validate::note(content)?;
        self.catalog.add_note(content)
    }

    pub fn note(&self, id: NoteId) -> Result<Note> {
        self.catalog.note(id)
    }

    pub fn notes(&self) -> Result<Vec<Note>> {
        self.catalog.notes()
    }

    pub fn update_note(&self, id: NoteId, content: &str) -> Result<Note> {
        validate::note(content)?;
        self.catalog.update_note(id, content)
    }

    pub fn delete_note(&self, id: NoteId) -> Result<()> {
        self.catalog.delete_note(id)
    }

    pub fn note_exists(&self, id: NoteId) -> Result<bool> {
        self.catalog.exists(EntityKind::Note, id)
    }
}
