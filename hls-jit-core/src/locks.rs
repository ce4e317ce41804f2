//! Filesystem-visible liveness marker per `(videoId, variant)`.
//!
//! `session.lock` asserts no cross-process locking; it exists only so the
//! supervisor (or an operator poking around on disk) can tell "a session
//! existed here" and how long ago it was last touched.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;

const LOCK_FILE_NAME: &str = "session.lock";

pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    pub fn for_output_dir(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(LOCK_FILE_NAME),
        }
    }

    /// Create the lock file if absent and refresh its mtime either way.
    pub fn touch(&self) -> Result<()> {
        filetime_set_now(&self.path)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Age of the lock file's mtime, or `None` if it doesn't exist.
    pub fn age(&self) -> Option<Duration> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age().map(|age| age > threshold).unwrap_or(false)
    }
}

/// Sets the file's mtime to now without pulling in a `filetime` dependency:
/// truncating create-or-open always resets mtime, and the lock file carries
/// no content worth preserving across touches.
fn filetime_set_now(path: &Path) -> Result<()> {
    std::fs::File::create(path)?;
    Ok(())
}
