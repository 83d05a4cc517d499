use std::{
    env,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use log::debug;

use crate::PedalwatchError;

const LOCK_FILE_NAME: &str = "pedalwatch.lock";

/// Where the lock lives unless `--lock-file` says otherwise.
pub fn default_lock_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(env::temp_dir)
        .join(LOCK_FILE_NAME)
}

/// Proof that this is the only running monitor. The lock is released when
/// the guard is dropped, or by the OS when the process dies.
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    _file: File,
}

impl InstanceGuard {
    /// # Errors
    ///
    /// `AlreadyRunning` when another process holds the lock on `path`.
    pub fn acquire(path: &Path) -> Result<Self, PedalwatchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PedalwatchError::InstanceLockIO { source: e })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| PedalwatchError::InstanceLockIO { source: e })?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(PedalwatchError::AlreadyRunning {
                    path: path.to_path_buf(),
                });
            }
            return Err(PedalwatchError::InstanceLockIO { source: e });
        }

        // informational only, the lock is what counts
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| PedalwatchError::InstanceLockIO { source: e })?;

        debug!("Acquired instance lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
