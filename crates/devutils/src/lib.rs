//! Shared test fixtures.

use std::{
    fs,
    io::Error,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

/// Temporary site directory, removed when dropped.
pub struct Site {
    dir: TempDir,
}

impl Site {
    pub fn new() -> Result<Self, Error> {
        let dir = tempfile::tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `relative` inside the site.
    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Site path as a document root string, ending in `/`.
    pub fn root(&self) -> String {
        format!("{}/", self.dir.path().display())
    }

    pub fn create_dir(&self, relative: &str) -> Result<PathBuf, Error> {
        let path = self.join(relative);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, relative: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf, Error> {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write an executable `/bin/sh` script.
    pub fn write_script(&self, relative: &str, body: &str) -> Result<PathBuf, Error> {
        let path = self.write_file(relative, format!("#!/bin/sh\n{}\n", body))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }
}
