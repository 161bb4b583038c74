//! Local run records.
//!
//! Two families of write-once flat files, named by run timestamp:
//!
//! ```text
//!   <dir>/spot_fleet_20261019_081500.txt   -> sfr-0123...
//!   <dir>/instance_ip_20261019_081500.txt  -> 203.0.113.5
//! ```
//!
//! "Most recent" is the lexicographically greatest name in a family, which
//! matches timestamp order because stamps are fixed-width. Runs started
//! within the same second get a `_NN` sequence suffix, which sorts after
//! the bare stamp.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::RecordError;
use crate::provision::ProvisionHandle;

const HANDLE_PREFIX: &str = "spot_fleet_";
const ADDRESS_PREFIX: &str = "instance_ip_";
const SUFFIX: &str = ".txt";
/// Same-second runs tolerated before giving up.
const MAX_SEQUENCE: u32 = 99;

/// Run identifier: a fixed-width UTC timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunStamp(String);

impl RunStamp {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self(time.format("%Y%m%d_%H%M%S").to_string())
    }

    /// The same second, disambiguated by a sequence number.
    pub fn with_sequence(&self, n: u32) -> Self {
        Self(format!("{}_{:02}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the records say about one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub stamp: RunStamp,
    pub handle: ProvisionHandle,
    pub address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunRecords {
    dir: PathBuf,
}

impl RunRecords {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, prefix: &str, stamp: &RunStamp) -> PathBuf {
        self.dir.join(format!("{}{}{}", prefix, stamp, SUFFIX))
    }

    pub async fn save_handle(
        &self,
        stamp: &RunStamp,
        handle: &ProvisionHandle,
    ) -> Result<PathBuf, RecordError> {
        let path = self.path(HANDLE_PREFIX, stamp);
        write_once(&path, handle.as_str()).await?;
        Ok(path)
    }

    /// Record the handle of a new run under a fresh stamp derived from
    /// `base`. A taken stamp gets the next free sequence suffix.
    pub async fn start_run(
        &self,
        base: &RunStamp,
        handle: &ProvisionHandle,
    ) -> Result<(RunStamp, PathBuf), RecordError> {
        let mut stamp = base.clone();
        let mut n = 0;
        loop {
            match self.save_handle(&stamp, handle).await {
                Ok(path) => return Ok((stamp, path)),
                Err(RecordError::AlreadyExists { .. }) if n < MAX_SEQUENCE => {
                    n += 1;
                    stamp = base.with_sequence(n);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn save_address(&self, stamp: &RunStamp, address: &str) -> Result<PathBuf, RecordError> {
        let path = self.path(ADDRESS_PREFIX, stamp);
        write_once(&path, address).await?;
        Ok(path)
    }

    /// The most recently recorded handle, if any.
    pub async fn latest_handle(&self) -> Result<Option<(RunStamp, ProvisionHandle)>, RecordError> {
        let Some(stamp) = self.latest_stamp(HANDLE_PREFIX).await? else {
            return Ok(None);
        };
        let value = read_record(&self.path(HANDLE_PREFIX, &stamp)).await?;
        Ok(Some((stamp, ProvisionHandle::new(value))))
    }

    /// The most recently recorded address, if any.
    pub async fn latest_address(&self) -> Result<Option<(RunStamp, String)>, RecordError> {
        let Some(stamp) = self.latest_stamp(ADDRESS_PREFIX).await? else {
            return Ok(None);
        };
        let value = read_record(&self.path(ADDRESS_PREFIX, &stamp)).await?;
        Ok(Some((stamp, value)))
    }

    /// Address recorded for a specific run.
    pub async fn address_for(&self, stamp: &RunStamp) -> Result<Option<String>, RecordError> {
        let path = self.path(ADDRESS_PREFIX, stamp);
        match read_record(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(RecordError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The latest run, with its address if one was recorded.
    pub async fn latest_run(&self) -> Result<Option<RunRecord>, RecordError> {
        let Some((stamp, handle)) = self.latest_handle().await? else {
            return Ok(None);
        };
        let address = self.address_for(&stamp).await?;
        Ok(Some(RunRecord {
            stamp,
            handle,
            address,
        }))
    }

    async fn latest_stamp(&self, prefix: &str) -> Result<Option<RunStamp>, RecordError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RecordError::Io {
                    path: self.dir.clone(),
                    source: e,
                });
            }
        };

        let mut latest: Option<String> = None;
        while let Some(entry) = entries.next_entry().await.map_err(|e| RecordError::Io {
            path: self.dir.clone(),
            source: e,
        })? {
            let name = entry.file_name();
            let Some(stamp) = name
                .to_str()
                .and_then(|n| n.strip_prefix(prefix))
                .and_then(|n| n.strip_suffix(SUFFIX))
            else {
                continue;
            };
            if latest.as_deref().is_none_or(|current| stamp > current) {
                latest = Some(stamp.to_string());
            }
        }
        Ok(latest.map(RunStamp))
    }
}

async fn write_once(path: &Path, value: &str) -> Result<(), RecordError> {
    let io_err = |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                RecordError::AlreadyExists {
                    path: path.to_path_buf(),
                }
            } else {
                io_err(e)
            }
        })?;
    file.write_all(format!("{}\n", value).as_bytes())
        .await
        .map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}

async fn read_record(path: &Path) -> Result<String, RecordError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let value = raw.trim();
    if value.is_empty() {
        return Err(RecordError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(value.to_string())
}
