use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::FileId;
use crate::search::SearchIndex;

/// Content handed to the indexer after a save.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub file_id: FileId,
    pub name: String,
    pub narration: String,
    pub content: Vec<u8>,
}

impl IndexJob {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Fire-and-forget indexing. Failures are logged, never returned to the saver.
pub trait Indexer: Send + Sync {
    fn index(&self, job: IndexJob);
    fn remove(&self, file_id: FileId);
    fn search(&self, query: &str, limit: usize) -> Result<Vec<FileId>>;
}

impl Indexer for SearchIndex {
    fn index(&self, job: IndexJob) {
        if let Err(e) = self.index_file(job.file_id, &job.name, &job.narration, &job.text()) {
            warn!(file_id = job.file_id, error = %e, "Failed to index file");
        }
    }

    fn remove(&self, file_id: FileId) {
        if let Err(e) = self.remove_file(file_id) {
            warn!(file_id, error = %e, "Failed to remove file from index");
        }
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<FileId>> {
        SearchIndex::search(self, query, limit).map_err(|e| Error::Index(e.to_string()))
    }
}

enum Command {
    Index(IndexJob),
    Remove(FileId),
    Flush(oneshot::Sender<()>),
}

/// Applies index jobs on a background task so saves never wait for tantivy.
pub struct LiveIndex {
    index: Arc<SearchIndex>,
    tx: mpsc::UnboundedSender<Command>,
}

impl LiveIndex {
    /// Must be called from within a tokio runtime.
    pub fn spawn(index: Arc<SearchIndex>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker_index = index.clone();

        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let index = worker_index.clone();
                let applied = match command {
                    Command::Index(job) => {
                        tokio::task::spawn_blocking(move || Indexer::index(&*index, job)).await
                    }
                    Command::Remove(file_id) => {
                        tokio::task::spawn_blocking(move || Indexer::remove(&*index, file_id)).await
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                        Ok(())
                    }
                };
                if let Err(e) = applied {
                    warn!(error = %e, "Index task panicked");
                }
            }
        });

        (Self { index, tx }, handle)
    }

    /// Resolves once every job queued before the call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Index worker has stopped; dropping job");
        }
    }
}

impl Indexer for LiveIndex {
    fn index(&self, job: IndexJob) {
        self.send(Command::Index(job));
    }

    fn remove(&self, file_id: FileId) {
        self.send(Command::Remove(file_id));
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<FileId>> {
        Indexer::search(&*self.index, query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(file_id: FileId, content: &str) -> IndexJob {
        IndexJob {
            file_id,
            name: format!("file{file_id}.txt"),
            narration: String::new(),
            content: content.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn live_index_applies_jobs_in_order() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(SearchIndex::new(dir.path()).unwrap());
        let (live, _handle) = LiveIndex::spawn(index);

        live.index(job(1, "apples and pears"));
        live.index(job(2, "pears only"));
        live.remove(1);
        live.flush().await;

        assert_eq!(live.search("pears", 10).unwrap(), vec![2]);
        assert!(live.search("apples", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_query_is_an_index_error() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(SearchIndex::new(dir.path()).unwrap());
        let (live, _handle) = LiveIndex::spawn(index);

        assert!(matches!(live.search("name:(", 10), Err(Error::Index(_))));
    }

    #[test]
    fn binary_content_is_indexed_lossily() {
        let dir = TempDir::new().unwrap();
        let index = SearchIndex::new(dir.path()).unwrap();
        let mut content = b"invoice ".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);

        Indexer::index(&index, IndexJob { content, ..job(3, "") });
        assert_eq!(Indexer::search(&index, "invoice", 5).unwrap(), vec![3]);
    }
}
