//! Plain-text documents kept as objects in an [`ObjectStore`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::batch::local::slugify;
use crate::batch::{DocumentRef, DocumentStore, ObjectStore};
use crate::error::BatchError;

/// One object per document under `prefix`. The document id is its key.
///
/// Appends rewrite the whole object, which is fine for a job that writes
/// each document from a single task.
pub struct ObjectDocumentStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectDocumentStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl DocumentStore for ObjectDocumentStore {
    async fn create_document(&self, title: &str) -> Result<DocumentRef, BatchError> {
        let base = slugify(title);
        let mut n = 1u32;
        loop {
            let key = if n == 1 {
                format!("{}{}.txt", self.prefix, base)
            } else {
                format!("{}{}-{}.txt", self.prefix, base, n)
            };
            if self.store.read_string(&key).await?.is_none() {
                self.store.upload_string(&key, "").await?;
                return Ok(DocumentRef {
                    url: self.store.object_url(&key),
                    id: key,
                });
            }
            n += 1;
        }
    }

    async fn append_content(&self, document: &DocumentRef, content: &str) -> Result<(), BatchError> {
        let existing = self
            .store
            .read_string(&document.id)
            .await?
            .ok_or_else(|| BatchError::Document {
                reason: format!("document {} does not exist", document.id),
            })?;
        self.store
            .upload_string(&document.id, &format!("{}{}", existing, content))
            .await
    }
}
