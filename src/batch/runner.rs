use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::batch::{
    DocumentStore, ItemMetadata, ItemStatus, ObjectInfo, ObjectStore, Transcriber, file_stem,
};
use crate::config::BatchConfig;
use crate::error::BatchError;

const RULE_WIDTH: usize = 50;

/// Totals for one batch run. `completed` includes `skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum ItemOutcome {
    Completed,
    Skipped,
}

pub struct BatchRunner {
    config: BatchConfig,
    store: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    transcriber: Arc<dyn Transcriber>,
}

impl BatchRunner {
    pub fn new(
        config: BatchConfig,
        store: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            config,
            store,
            documents,
            transcriber,
        }
    }

    /// Audio objects to process, in key order.
    pub async fn audio_items(&self) -> Result<Vec<ObjectInfo>, BatchError> {
        let suffix = format!(".{}", self.config.audio_extension);
        let mut items: Vec<ObjectInfo> = self
            .store
            .list(&self.config.audio_prefix)
            .await?
            .into_iter()
            .filter(|o| o.key.ends_with(&suffix))
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    /// Process every item. Only a failure to list the inputs is fatal;
    /// per-item errors are counted and the run moves on.
    pub async fn run(&self) -> Result<BatchSummary, BatchError> {
        let items = self.audio_items().await?;
        let mut summary = BatchSummary {
            total: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            tracing::warn!(
                prefix = %self.config.audio_prefix,
                extension = %self.config.audio_extension,
                "No audio files found"
            );
            return Ok(summary);
        }

        tracing::info!(count = items.len(), model = self.transcriber.model(), "Starting batch");
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;

        for (index, item) in items.iter().enumerate() {
            tracing::info!(
                item = %item.key,
                size_mb = %format!("{:.1}", item.size as f64 / (1024.0 * 1024.0)),
                "Processing file {}/{}",
                index + 1,
                items.len()
            );
            match self.process(item).await {
                Ok(ItemOutcome::Completed) => summary.completed += 1,
                Ok(ItemOutcome::Skipped) => {
                    summary.completed += 1;
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(item = %item.key, error = %e, "Item failed; continuing");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            total = summary.total,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Batch finished"
        );
        Ok(summary)
    }

    async fn process(&self, item: &ObjectInfo) -> Result<ItemOutcome, BatchError> {
        let mut meta = self.load_metadata(&item.key).await?;

        if meta.is_done() {
            tracing::info!(
                item = %item.key,
                url = meta.document_url.as_deref().unwrap_or_default(),
                "Already completed"
            );
            return Ok(ItemOutcome::Skipped);
        }

        let transcript = match meta.reusable_transcript() {
            Some(text) => {
                tracing::info!(item = %item.key, "Reusing stored transcript");
                text.to_string()
            }
            None => {
                let text = self.transcribe(item, &mut meta).await?;
                self.save_metadata(&meta).await?;
                text
            }
        };

        let title = format!("{} - Transcript", meta.title);
        let document = self.documents.create_document(&title).await?;
        let content = format!("{}{}", render_header(&meta), transcript);
        self.documents.append_content(&document, &content).await?;
        tracing::info!(item = %item.key, document = %document.id, url = %document.url, "Document created");

        meta.document_id = Some(document.id);
        meta.document_url = Some(document.url);
        meta.status = ItemStatus::Completed;
        self.save_metadata(&meta).await?;
        Ok(ItemOutcome::Completed)
    }

    /// Download, transcribe and record the result. The temp copy is
    /// removed whatever happens.
    async fn transcribe(
        &self,
        item: &ObjectInfo,
        meta: &mut ItemMetadata,
    ) -> Result<String, BatchError> {
        let local = self.config.temp_dir.join(&meta.filename);
        let started = Instant::now();

        let result = async {
            tracing::info!(item = %item.key, dest = %local.display(), "Downloading");
            self.store.download(&item.key, &local).await?;
            tracing::info!(item = %item.key, model = self.transcriber.model(), "Transcribing");
            self.transcriber.transcribe(&local).await
        }
        .await;
        remove_temp(&local).await;
        let transcript = result?;

        let elapsed = started.elapsed().as_secs_f64() / 60.0;
        let text = transcript.text.trim().to_string();
        meta.transcript = Some(text.clone());
        meta.model = Some(self.transcriber.model().to_string());
        meta.transcribed_at = Some(Utc::now());
        meta.duration_minutes = transcript.duration_secs.map(|s| s / 60.0);
        meta.processing_minutes = Some(elapsed);
        meta.status = ItemStatus::Transcribed;
        tracing::info!(
            item = %item.key,
            minutes = %format!("{:.1}", elapsed),
            "Transcription finished"
        );
        Ok(text)
    }

    fn metadata_key(&self, filename: &str) -> String {
        format!("{}{}.json", self.config.metadata_prefix, file_stem(filename))
    }

    /// Stored metadata, or a fresh `pending` record. Unreadable records
    /// are replaced.
    async fn load_metadata(&self, source_path: &str) -> Result<ItemMetadata, BatchError> {
        let fresh = ItemMetadata::new(source_path);
        let key = self.metadata_key(&fresh.filename);
        let Some(raw) = self.store.read_string(&key).await? else {
            return Ok(fresh);
        };
        match serde_json::from_str(&raw) {
            Ok(meta) => Ok(meta),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Malformed metadata; starting over");
                Ok(fresh)
            }
        }
    }

    async fn save_metadata(&self, meta: &ItemMetadata) -> Result<(), BatchError> {
        let key = self.metadata_key(&meta.filename);
        let body = serde_json::to_string_pretty(meta).map_err(|e| BatchError::Metadata {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.upload_string(&key, &body).await
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Could not remove temp file");
    }
}

/// Plain-text header placed above each transcript.
pub fn render_header(meta: &ItemMetadata) -> String {
    let generated = meta
        .transcribed_at
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let duration = meta
        .duration_minutes
        .map(|m| format!("{:.1} minutes", m))
        .unwrap_or_else(|| "Unknown".to_string());
    format!(
        "TRANSCRIPT: {}\nGenerated: {}\nModel: {}\nDuration: {}\n\n{}\n\n",
        meta.title,
        generated,
        meta.model.as_deref().unwrap_or("Unknown"),
        duration,
        "=".repeat(RULE_WIDTH)
    )
}

/// Power the machine off after `delay`.
pub async fn power_off(delay: Duration) -> Result<(), BatchError> {
    tracing::info!(secs = delay.as_secs(), "Shutting down after grace period (Ctrl-C to cancel)");
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown cancelled");
            return Ok(());
        }
    }
    let status = tokio::process::Command::new("sudo")
        .args(["shutdown", "-h", "now"])
        .status()
        .await?;
    if !status.success() {
        return Err(std::io::Error::other(format!("shutdown exited with {}", status)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_header_with_known_values() {
        let mut meta = ItemMetadata::new("audio_files/interview.m4a");
        meta.model = Some("medium".into());
        meta.duration_minutes = Some(42.3);
        meta.transcribed_at = Some(Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap());

        let header = render_header(&meta);
        assert_eq!(
            header,
            format!(
                "TRANSCRIPT: interview\nGenerated: 2026-10-19T08:30:00\nModel: medium\nDuration: 42.3 minutes\n\n{}\n\n",
                "=".repeat(50)
            )
        );
    }

    #[test]
    fn test_header_with_unknowns() {
        let meta = ItemMetadata::new("audio_files/x.m4a");
        let header = render_header(&meta);
        assert!(header.contains("Generated: Unknown\n"));
        assert!(header.contains("Model: Unknown\n"));
        assert!(header.contains("Duration: Unknown\n"));
    }
}
