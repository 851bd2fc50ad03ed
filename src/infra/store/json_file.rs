//! JSON file record store with atomic replace.
//!
//! The canonical file is a JSON array of [`TransferRecord`]. Writes go to a
//! temporary file in the same directory, are fsynced, and then renamed over
//! the canonical path in one step, so readers only ever see a complete old
//! or a complete new version.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::domain::{AppError, RecordStore, StoreError, TransferRecord};

/// Record store backed by a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn io_error(&self, e: impl std::fmt::Display) -> AppError {
        AppError::Store(StoreError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Write `records` to a temporary file next to the canonical one.
    ///
    /// Nothing is visible at the canonical path until
    /// [`StagedWrite::commit`] is called.
    pub fn stage(&self, records: &[TransferRecord]) -> Result<StagedWrite, AppError> {
        let bytes = serde_json::to_vec(records)
            .map_err(|e| AppError::Store(StoreError::Serialization(e.to_string())))?;
        self.stage_bytes(&bytes)
    }

    fn stage_bytes(&self, bytes: &[u8]) -> Result<StagedWrite, AppError> {
        let temp = tempfile::Builder::new()
            .prefix(".records-")
            .suffix(".tmp")
            .tempfile_in(self.directory())
            .map_err(|e| self.io_error(e))?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            writer.write_all(bytes).map_err(|e| self.io_error(e))?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;

        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
        })
    }
}

/// A fully written temporary file waiting to replace the canonical store.
///
/// Dropping it without committing deletes the temporary file and leaves the
/// canonical store untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically rename the staged file over the canonical path
    pub fn commit(self) -> Result<(), AppError> {
        let target = self.target;
        self.temp.persist(&target).map_err(|e| {
            AppError::Store(StoreError::Io {
                path: target.display().to_string(),
                message: e.error.to_string(),
            })
        })?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<TransferRecord>, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No record store yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let records: Vec<TransferRecord> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Store(StoreError::Corrupt {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })
        })?;

        info!(count = records.len(), "Loaded record store");
        Ok(records)
    }

    #[instrument(skip(self, records), fields(path = %self.path.display(), count = records.len()))]
    async fn persist(&self, records: &[TransferRecord]) -> Result<(), AppError> {
        let bytes = serde_json::to_vec(records)
            .map_err(|e| AppError::Store(StoreError::Serialization(e.to_string())))?;

        let store = self.clone();
        tokio::task::spawn_blocking(move || store.stage_bytes(&bytes)?.commit())
            .await
            .map_err(|e| self.io_error(e))??;

        debug!("Record store persisted");
        Ok(())
    }
}
