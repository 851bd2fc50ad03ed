//! Status file reporter.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{StatusReporter, SyncStatus};

/// Writes every snapshot to a JSON file, replacing it atomically.
///
/// Called inline on every window. The temp file is renamed into place
/// without an fsync, so the newest snapshot may be lost on power failure.
/// Failures are logged and swallowed; a broken status file never stops the
/// sync loop.
#[derive(Debug, Clone)]
pub struct FileStatusReporter {
    path: PathBuf,
}

impl FileStatusReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, status: &SyncStatus) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let bytes = serde_json::to_vec_pretty(status)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".status-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        temp.write_all(&bytes)?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl StatusReporter for FileStatusReporter {
    fn report(&self, status: &SyncStatus) {
        if let Err(e) = self.write(status) {
            warn!(path = %self.path.display(), error = %e, "Failed to write status file");
        }
    }
}
