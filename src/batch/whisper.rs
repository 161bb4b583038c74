//! Transcriber that shells out to the `whisper` command-line tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::batch::{Transcriber, Transcript};
use crate::error::BatchError;

#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    model: String,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
        }
    }

    fn args(&self, audio: &Path, output_dir: &Path) -> Vec<String> {
        vec![
            audio.display().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "json".to_string(),
            "--output_dir".to_string(),
            output_dir.display().to_string(),
            "--verbose".to_string(),
            "False".to_string(),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    end: f64,
}

/// Text and duration from whisper's JSON output. The duration is the end
/// of the last segment.
pub(crate) fn parse_output(raw: &str) -> Result<Transcript, serde_json::Error> {
    let output: WhisperOutput = serde_json::from_str(raw)?;
    let duration_secs = output
        .segments
        .iter()
        .map(|s| s.end)
        .fold(None, |acc: Option<f64>, end| Some(acc.map_or(end, |a| a.max(end))));
    Ok(Transcript {
        text: output.text.trim().to_string(),
        duration_secs,
    })
}

fn output_path(audio: &Path, output_dir: &Path) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}.json", stem))
}

/// Read whisper's JSON output and remove it. A file that cannot be removed
/// is logged and left behind.
async fn take_output(json_path: &Path) -> std::io::Result<String> {
    let raw = tokio::fs::read_to_string(json_path).await?;
    if let Err(e) = tokio::fs::remove_file(json_path).await {
        tracing::warn!(path = %json_path.display(), error = %e, "Could not remove whisper output");
    }
    Ok(raw)
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    fn model(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, audio: &Path) -> Result<Transcript, BatchError> {
        let failed = |reason: String| BatchError::Transcription {
            path: audio.to_path_buf(),
            reason,
        };
        let output_dir = audio.parent().unwrap_or(Path::new("."));

        let output = Command::new(&self.program)
            .args(self.args(audio, output_dir))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!("could not run {}: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let json_path = output_path(audio, output_dir);
        let raw = take_output(&json_path)
            .await
            .map_err(|e| failed(format!("missing output {}: {}", json_path.display(), e)))?;
        parse_output(&raw).map_err(|e| failed(format!("unreadable output: {}", e)))
    }
}
