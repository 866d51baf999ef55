//! Advisory exclusive lock on the registry file.
//!
//! Held for the full duration of every mutating command so that concurrent
//! invocations (two CI jobs on a shared checkout, say) serialize instead of
//! interleaving their load/modify/save cycles.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Scoped exclusive lock. Released when dropped.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Poll for the lock every `poll` until `timeout` has elapsed.
    pub fn acquire(path: &Path, timeout: Duration, poll: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        let contended = fs2::lock_contended_error().raw_os_error();
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!(path = %path.display(), attempts, "registry lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.raw_os_error().is_some() && e.raw_os_error() == contended => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                warn!(path = %path.display(), waited_ms, "timed out waiting for registry lock");
                return Err(StoreError::LockTimeout {
                    path: path.display().to_string(),
                    waited_ms,
                });
            }
            std::thread::sleep(poll.min(timeout - waited));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release registry lock");
        } else {
            debug!(path = %self.path.display(), "registry lock released");
        }
    }
}
