//! Batch transcription job.
//!
//! This is the work that gets dispatched to the instance. It walks the
//! audio objects under a prefix and moves each one through a small,
//! resumable state machine whose state lives in a JSON metadata object
//! next to the audio:
//!
//! ```text
//!   pending ──download+transcribe──► transcribed ──create document──► completed
//! ```
//!
//! A rerun skips `completed` items and reuses the stored transcript of
//! `transcribed` ones. Storage, documents and the speech model are behind
//! the [`ObjectStore`], [`DocumentStore`] and [`Transcriber`] traits.

pub mod local;
pub mod object_docs;
pub mod runner;
pub mod s3;
pub mod whisper;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BatchConfig;
use crate::error::BatchError;

pub use local::{LocalDocumentStore, LocalObjectStore};
pub use object_docs::ObjectDocumentStore;
pub use runner::{BatchRunner, BatchSummary, power_off};
pub use s3::S3ObjectStore;
pub use whisper::CommandTranscriber;

/// The configured object store: the bucket when one is set, otherwise the
/// local directory.
pub fn object_store(config: &BatchConfig) -> Arc<dyn ObjectStore> {
    match &config.bucket {
        Some(location) => Arc::new(S3ObjectStore::new(location.clone())),
        None => Arc::new(LocalObjectStore::new(&config.store_root)),
    }
}

/// The configured document store. Documents live next to the audio when a
/// bucket is set, so they outlive the instance.
pub fn document_store(config: &BatchConfig, store: Arc<dyn ObjectStore>) -> Arc<dyn DocumentStore> {
    match config.bucket {
        Some(_) => Arc::new(ObjectDocumentStore::new(store, config.docs_prefix.clone())),
        None => Arc::new(LocalDocumentStore::new(&config.docs_root)),
    }
}

/// Processing status of one audio item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Transcribed,
    Completed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Transcribed => write!(f, "transcribed"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Persisted per-item state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub filename: String,
    pub title: String,
    /// Object key of the audio.
    pub source_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

impl ItemMetadata {
    /// Fresh `pending` record for an audio object.
    pub fn new(source_path: &str) -> Self {
        let filename = source_path
            .rsplit('/')
            .next()
            .unwrap_or(source_path)
            .to_string();
        Self {
            title: file_stem(&filename),
            filename,
            source_path: source_path.to_string(),
            created_at: Utc::now(),
            status: ItemStatus::Pending,
            transcript: None,
            model: None,
            transcribed_at: None,
            duration_minutes: None,
            processing_minutes: None,
            document_id: None,
            document_url: None,
        }
    }

    /// Nothing left to do for this item.
    pub fn is_done(&self) -> bool {
        self.status == ItemStatus::Completed && self.document_url.is_some()
    }

    /// Transcript that can be reused instead of transcribing again.
    pub fn reusable_transcript(&self) -> Option<&str> {
        match self.status {
            ItemStatus::Transcribed | ItemStatus::Completed => self.transcript.as_deref(),
            ItemStatus::Pending => None,
        }
    }
}

/// File name without its final extension.
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// An object in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Key/value object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BatchError>;

    async fn download(&self, key: &str, dest: &Path) -> Result<(), BatchError>;

    async fn upload(&self, src: &Path, key: &str) -> Result<(), BatchError>;

    /// Object body as text. `None` if the key does not exist.
    async fn read_string(&self, key: &str) -> Result<Option<String>, BatchError>;

    async fn upload_string(&self, key: &str, body: &str) -> Result<(), BatchError>;

    /// Where an operator can find the object.
    fn object_url(&self, key: &str) -> String {
        key.to_string()
    }
}

/// A created document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub url: String,
}

/// Where finished transcripts go.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, title: &str) -> Result<DocumentRef, BatchError>;

    async fn append_content(&self, document: &DocumentRef, content: &str)
    -> Result<(), BatchError>;
}

/// Output of a transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// Audio length, when the engine reports it.
    pub duration_secs: Option<f64>,
}

/// Speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Model name recorded in metadata.
    fn model(&self) -> &str;

    async fn transcribe(&self, audio: &Path) -> Result<Transcript, BatchError>;
}
