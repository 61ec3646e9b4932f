use anyhow::Result;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    doc,
    schema::{Field, Schema, STORED, STRING, TEXT},
    Index, ReloadPolicy, Term,
};

use crate::model::FileId;

pub struct SearchIndex {
    index: Index,
    id: Field,
    name: Field,
    narration: Field,
    content: Field,
}

impl SearchIndex {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let id = schema_builder.add_text_field("id", STRING | STORED);
        let name = schema_builder.add_text_field("name", TEXT | STORED);
        let narration = schema_builder.add_text_field("narration", TEXT);
        let content = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let index = Index::open_or_create(dir, schema)?;
        Ok(Self {
            index,
            id,
            name,
            narration,
            content,
        })
    }

    /// Index a file, replacing any earlier document for the same id.
    pub fn index_file(&self, id: FileId, name: &str, narration: &str, content: &str) -> Result<()> {
        let mut writer = self.index.writer(50_000_000)?;
        writer.delete_term(Term::from_field_text(self.id, &id.to_string()));
        writer.add_document(doc!(
            self.id => id.to_string(),
            self.name => name,
            self.narration => narration,
            self.content => content,
        ))?;
        writer.commit()?;
        writer.wait_merging_threads()?;
        Ok(())
    }

    pub fn remove_file(&self, id: FileId) -> Result<()> {
        let mut writer = self.index.writer(50_000_000)?;
        writer.delete_term(Term::from_field_text(self.id, &id.to_string()));
        writer.commit()?;
        writer.wait_merging_threads()?;
        Ok(())
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FileId>> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommit)
            .try_into()?;
        let searcher = reader.searcher();
        let parser = tantivy::query::QueryParser::for_index(
            &self.index,
            vec![self.name, self.narration, self.content],
        );
        let q = parser.parse_query(query)?;
        let docs = searcher.search(&q, &TopDocs::with_limit(limit))?;
        Ok(docs
            .into_iter()
            .filter_map(|(_score, addr)| {
                let retrieved = searcher.doc(addr).ok()?;
                let field = retrieved.get_first(self.id)?;
                field.as_text().and_then(|s| s.parse().ok())
            })
            .collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let segments = self.index.searchable_segment_metas()?;
        let total_docs: u32 = segments.iter().map(|s| s.num_docs()).sum();
        let deleted_docs: u32 = segments.iter().map(|s| s.num_deleted_docs()).sum();

        Ok(IndexStats {
            total_docs,
            deleted_docs,
            num_segments: segments.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub total_docs: u32,
    pub deleted_docs: u32,
    pub num_segments: usize,
}
