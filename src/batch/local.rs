//! Directory-backed object and document stores.
//!
//! Keys map onto relative paths under a root directory, so
//! `audio_files/a.m4a` is `<root>/audio_files/a.m4a`. A synced bucket
//! mount works as the root as well as a plain directory does.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::batch::{DocumentRef, DocumentStore, ObjectInfo, ObjectStore};
use crate::error::BatchError;

fn storage_err(key: &str, e: impl std::fmt::Display) -> BatchError {
    BatchError::Storage {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path for a key. Keys that would escape the root are rejected.
    fn path(&self, key: &str) -> Result<PathBuf, BatchError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(storage_err(key, "invalid object key"));
        }
        Ok(self.root.join(relative))
    }
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BatchError> {
        // Split "audio_files/ep" into directory "audio_files/" and name prefix "ep".
        let (dir_key, name_prefix) = match prefix.rfind('/') {
            Some(idx) => prefix.split_at(idx + 1),
            None => ("", prefix),
        };
        let dir = if dir_key.is_empty() {
            self.root.clone()
        } else {
            self.path(dir_key.trim_end_matches('/'))?
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(prefix, e)),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| storage_err(prefix, e))? {
            let meta = entry.metadata().await.map_err(|e| storage_err(prefix, e))?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(name_prefix) {
                objects.push(ObjectInfo {
                    key: format!("{}{}", dir_key, name),
                    size: meta.len(),
                });
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), BatchError> {
        let src = self.path(key)?;
        ensure_parent(dest).await.map_err(|e| storage_err(key, e))?;
        tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| storage_err(key, e))?;
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<(), BatchError> {
        let dest = self.path(key)?;
        ensure_parent(&dest).await.map_err(|e| storage_err(key, e))?;
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| storage_err(key, e))?;
        Ok(())
    }

    async fn read_string(&self, key: &str) -> Result<Option<String>, BatchError> {
        match tokio::fs::read_to_string(self.path(key)?).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(key, e)),
        }
    }

    async fn upload_string(&self, key: &str, body: &str) -> Result<(), BatchError> {
        let dest = self.path(key)?;
        ensure_parent(&dest).await.map_err(|e| storage_err(key, e))?;
        // Write then rename so readers never see a half-written record.
        let tmp = dest.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage_err(key, e))?;
        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| storage_err(key, e))
    }

    fn object_url(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}

/// Plain-text documents, one file per document.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.txt", id))
    }
}

/// File-system safe id derived from a document title.
pub(crate) fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

fn doc_err(e: impl std::fmt::Display) -> BatchError {
    BatchError::Document {
        reason: e.to_string(),
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn create_document(&self, title: &str) -> Result<DocumentRef, BatchError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(doc_err)?;
        let base = slugify(title);

        let mut n = 1u32;
        loop {
            let id = if n == 1 {
                base.clone()
            } else {
                format!("{}-{}", base, n)
            };
            let path = self.path(&id);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    let absolute = tokio::fs::canonicalize(&path).await.map_err(doc_err)?;
                    return Ok(DocumentRef {
                        id,
                        url: format!("file://{}", absolute.display()),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(doc_err(e)),
            }
        }
    }

    async fn append_content(&self, document: &DocumentRef, content: &str) -> Result<(), BatchError> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.path(&document.id))
            .await
            .map_err(doc_err)?;
        file.write_all(content.as_bytes()).await.map_err(doc_err)?;
        file.flush().await.map_err(doc_err)
    }
}
