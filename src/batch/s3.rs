//! S3 object store driven through the `aws` CLI.
//!
//! Listing uses `aws s3api list-objects-v2` (the CLI follows continuation
//! tokens itself); transfers use `aws s3 cp`, with `-` standing for
//! stdin/stdout on the string calls.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::batch::{ObjectInfo, ObjectStore};
use crate::config::BucketLocation;
use crate::error::BatchError;

/// Fragments of the CLI's error text for a key that does not exist.
const MISSING_MARKERS: &[&str] = &["(404)", "NoSuchKey", "Not Found", "does not exist"];

pub struct S3ObjectStore {
    program: String,
    location: BucketLocation,
}

impl S3ObjectStore {
    pub fn new(location: BucketLocation) -> Self {
        Self {
            program: "aws".to_string(),
            location,
        }
    }

    /// Use a different executable (e.g. a pinned path or a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.location.root, key)
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.location.bucket, self.full_key(key))
    }

    pub(crate) fn list_args(&self, prefix: &str) -> Vec<String> {
        vec![
            "s3api".to_string(),
            "list-objects-v2".to_string(),
            "--bucket".to_string(),
            self.location.bucket.clone(),
            "--prefix".to_string(),
            self.full_key(prefix),
            "--output".to_string(),
            "json".to_string(),
        ]
    }

    pub(crate) fn copy_args(from: &str, to: &str) -> Vec<String> {
        vec![
            "s3".to_string(),
            "cp".to_string(),
            from.to_string(),
            to.to_string(),
            "--only-show-errors".to_string(),
        ]
    }

    /// Run the CLI, feeding `stdin` when given. A non-zero exit is returned
    /// as output; `Err` means the CLI could not be run at all.
    async fn run(
        &self,
        key: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<std::process::Output, BatchError> {
        let failed = |e: std::io::Error| BatchError::Storage {
            key: key.to_string(),
            reason: format!("failed to run {}: {}", self.program, e),
        };

        tracing::debug!(key, command = %args[..2].join(" "), "Running storage command");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(failed)?;

        if let Some(body) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(body.as_bytes()).await.map_err(failed)?;
            // Dropping the pipe closes it so the CLI sees end of input.
            drop(pipe);
        }
        child.wait_with_output().await.map_err(failed)
    }
}

fn command_failed(key: &str, output: &std::process::Output) -> BatchError {
    BatchError::Storage {
        key: key.to_string(),
        reason: format!(
            "aws exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    }
}

pub(crate) fn is_missing(stderr: &str) -> bool {
    MISSING_MARKERS.iter().any(|m| stderr.contains(m))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Listing {
    #[serde(default)]
    contents: Vec<ListedObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    #[serde(default)]
    size: u64,
}

/// Objects from a `list-objects-v2` response, keyed relative to `root`.
/// Folder placeholder keys are dropped.
pub(crate) fn parse_listing(raw: &str, root: &str) -> Result<Vec<ObjectInfo>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let listing: Listing = serde_json::from_str(raw)?;
    let mut objects: Vec<ObjectInfo> = listing
        .contents
        .into_iter()
        .filter(|o| !o.key.ends_with('/'))
        .filter_map(|o| {
            o.key.strip_prefix(root).map(|key| ObjectInfo {
                key: key.to_string(),
                size: o.size,
            })
        })
        .collect();
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BatchError> {
        let output = self.run(prefix, &self.list_args(prefix), None).await?;
        if !output.status.success() {
            return Err(command_failed(prefix, &output));
        }
        parse_listing(&String::from_utf8_lossy(&output.stdout), &self.location.root).map_err(
            |e| BatchError::Storage {
                key: prefix.to_string(),
                reason: format!("unreadable listing: {}", e),
            },
        )
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), BatchError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args = Self::copy_args(&self.uri(key), &dest.display().to_string());
        let output = self.run(key, &args, None).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(command_failed(key, &output))
        }
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<(), BatchError> {
        let args = Self::copy_args(&src.display().to_string(), &self.uri(key));
        let output = self.run(key, &args, None).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(command_failed(key, &output))
        }
    }

    async fn read_string(&self, key: &str) -> Result<Option<String>, BatchError> {
        let output = self
            .run(key, &Self::copy_args(&self.uri(key), "-"), None)
            .await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        if is_missing(&String::from_utf8_lossy(&output.stderr)) {
            return Ok(None);
        }
        Err(command_failed(key, &output))
    }

    async fn upload_string(&self, key: &str, body: &str) -> Result<(), BatchError> {
        let output = self
            .run(key, &Self::copy_args("-", &self.uri(key)), Some(body))
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(command_failed(key, &output))
        }
    }

    fn object_url(&self, key: &str) -> String {
        self.uri(key)
    }
}
