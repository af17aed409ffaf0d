//! Working-directory lifecycle for the local copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::Config;

/// Filesystem home of the mirrored checkout.
///
/// Resolves to the `file:` source path, the configured base directory, or
/// a generated temp directory. Only the temp directory is owned: it is
/// removed best-effort when the value drops.
#[derive(Debug)]
pub struct Workdir {
    path: PathBuf,
    local_source: bool,
    temp: Option<TempDir>,
}

impl Workdir {
    /// Resolve the working directory for `config`, generating a temp
    /// directory when neither a base directory nor a local source is set.
    ///
    /// # Errors
    ///
    /// Returns error if the temp directory cannot be created.
    pub fn establish(config: &Config) -> io::Result<Self> {
        if let Some(source) = config.local_source_path() {
            return Ok(Self {
                path: source,
                local_source: true,
                temp: None,
            });
        }
        if let Some(basedir) = &config.basedir {
            return Ok(Self {
                path: basedir.clone(),
                local_source: false,
                temp: None,
            });
        }
        let temp = tempfile::Builder::new()
            .prefix(&config.temp_dir_prefix)
            .tempdir()?;
        Ok(Self {
            path: temp.path().to_path_buf(),
            local_source: false,
            temp: Some(temp),
        })
    }

    /// Directory consumers read files from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this directory is an opened-in-place `file:` source.
    #[must_use]
    pub const fn is_local_source(&self) -> bool {
        self.local_source
    }

    /// Whether the directory currently holds repository metadata.
    #[must_use]
    pub fn has_repository(&self) -> bool {
        self.path.join(".git").exists()
    }

    /// Recursively delete the directory, ahead of a from-scratch clone or
    /// after one that failed. Local sources are never deleted.
    ///
    /// # Errors
    ///
    /// Returns error if the directory is a local source or cannot be
    /// removed.
    pub fn delete_base_if_exists(&self) -> io::Result<()> {
        if self.local_source {
            return Err(io::Error::other(
                "refusing to delete a local source repository",
            ));
        }
        if self.path.exists() {
            fs::remove_dir_all(&self.path)?;
        }
        Ok(())
    }

    /// Recreate the base directory after [`Self::delete_base_if_exists`].
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub fn create_base(&self) -> io::Result<()> {
        fs::create_dir_all(&self.path)
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        let path = temp.path().to_path_buf();
        if let Err(error) = temp.close() {
            // Already gone is fine, that is the state we wanted
            if error.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    "could not remove temp directory {}: {error}",
                    path.display()
                );
            }
        }
    }
}
