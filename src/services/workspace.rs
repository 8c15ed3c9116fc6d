use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const WORKDIR_PREFIX: &str = "rbit-epub-";

/// Scratch directory owned by a single build job.
///
/// Dropping it removes the directory. A finished job either calls
/// [`WorkingDirectory::remove`] to delete it and surface I/O errors, or
/// [`WorkingDirectory::retain`] to leave it on disk.
#[derive(Debug)]
pub struct WorkingDirectory {
    dir: TempDir,
}

impl WorkingDirectory {
    /// Create a uniquely named directory under the system temp dir.
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(WORKDIR_PREFIX).tempdir()?;
        Ok(Self { dir })
    }

    /// Create a uniquely named directory under `parent`.
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Delete the directory and everything in it.
    pub fn remove(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Leave the directory on disk and hand back its path.
    pub fn retain(self) -> PathBuf {
        self.dir.keep()
    }
}
