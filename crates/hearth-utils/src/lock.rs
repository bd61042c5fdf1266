//! Advisory `flock`-based locks.
//!
//! A lock guards a named resource (for example a backend instance) across
//! processes. It is released when the [`FileLock`] is dropped.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    fcntl::{Flock, FlockArg},
};

use crate::{
    error::{LockError, LockResult},
    path::{file_name_component, xdg_runtime_dir},
};

/// An exclusive lock on a `<name>.lock` file.
pub struct FileLock {
    _file: Flock<File>,
    path: PathBuf,
}

impl FileLock {
    /// Default lock directory: `$XDG_RUNTIME_DIR/hearth/locks`.
    pub fn default_dir() -> PathBuf {
        xdg_runtime_dir().join("hearth").join("locks")
    }

    /// Lock file path for `name` inside `dir`, see [`file_name_component`].
    pub fn lock_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.lock", file_name_component(name)))
    }

    /// Try to acquire an exclusive lock without blocking.
    ///
    /// Returns `None` if another holder has it.
    pub fn try_acquire(dir: &Path, name: &str) -> LockResult<Option<Self>> {
        let (path, file) = Self::open(dir, name)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(file) => {
                Ok(Some(FileLock {
                    _file: file,
                    path,
                }))
            }
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, err)) => {
                Err(LockError::AcquireFailed(format!(
                    "{}: {}",
                    path.display(),
                    err
                )))
            }
        }
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(dir: &Path, name: &str) -> LockResult<(PathBuf, File)> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }

        let path = Self::lock_path(dir, name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok((path, file))
    }
}
