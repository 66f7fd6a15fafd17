//! Scratch output file owned by one invocation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of the artifact a tool writes, removed when the invocation is done.
///
/// `remove` is called explicitly at the end of every invocation; the `Drop`
/// impl covers early returns and unwinding. Removing a file that never
/// existed is not an error.
#[derive(Debug)]
pub struct ScratchOutput {
    path: PathBuf,
    removed: bool,
}

impl ScratchOutput {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the artifact, `None` if it does not exist.
    pub fn len(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }

    /// Whether the tool left a non-empty artifact behind.
    pub fn is_populated(&self) -> bool {
        matches!(self.len(), Some(n) if n > 0)
    }

    /// Delete the artifact. Idempotent.
    pub fn remove(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed scratch output");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ScratchOutput {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch output");
        }
    }
}
