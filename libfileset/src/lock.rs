//! Cross-process advisory lock.
//!
//! Mutating volume operations must not interleave, neither between tasks of
//! one plugin process nor between plugin processes on the same filesystem.
//! [`AdvisoryLock`] combines an in-process async mutex with an exclusive
//! `flock(2)` on a lock file; the [`LockGuard`] it hands out releases both
//! when dropped.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::fcntl::{Flock, FlockArg};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::VolumeError;

/// Exclusive lock shared by all mutating backend operations.
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    path: PathBuf,
    local: Arc<Mutex<()>>,
}

/// Proof that the holder owns the [`AdvisoryLock`].  Dropping it releases
/// the lock; [`LockGuard::release`] does the same but reports unlock errors.
pub struct LockGuard {
    flock: Option<Flock<File>>,
    _local: OwnedMutexGuard<()>,
}

impl AdvisoryLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            local: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the lock is free and take it.
    pub async fn acquire(&self) -> Result<LockGuard, VolumeError> {
        let local = Arc::clone(&self.local).lock_owned().await;

        let path = self.path.clone();
        let flock = tokio::task::spawn_blocking(move || lock_file(&path))
            .await
            .map_err(VolumeError::lock)??;

        debug!(path = %self.path.display(), "advisory lock acquired");
        Ok(LockGuard {
            flock: Some(flock),
            _local: local,
        })
    }
}

fn lock_file(path: &Path) -> Result<Flock<File>, VolumeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| VolumeError::Lock(format!("create {}: {e}", parent.display())))?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
        .map_err(|e| VolumeError::Lock(format!("open {}: {e}", path.display())))?;

    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, e)| VolumeError::Lock(format!("flock {}: {e}", path.display())))
}

impl LockGuard {
    /// Release the lock explicitly.
    pub fn release(mut self) -> Result<(), VolumeError> {
        match self.flock.take() {
            Some(flock) => flock
                .unlock()
                .map(drop)
                .map_err(|(_flock, e)| VolumeError::Lock(format!("unlock: {e}"))),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(flock) = self.flock.take()
            && let Err((_flock, e)) = flock.unlock()
        {
            // Closing the descriptor when `_flock` drops still releases it.
            warn!(error = %e, "failed to unlock advisory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn excludes_other_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = AdvisoryLock::new(tmp.path().join("plugin.lock"));
        let guard = lock.acquire().await.unwrap();

        // A separate open file description behaves like another process.
        let file = File::open(lock.path()).unwrap();
        assert!(Flock::lock(file, FlockArg::LockExclusiveNonblock).is_err());

        guard.release().unwrap();
        let file = File::open(lock.path()).unwrap();
        assert!(Flock::lock(file, FlockArg::LockExclusiveNonblock).is_ok());
    }

    #[tokio::test]
    async fn drop_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = AdvisoryLock::new(tmp.path().join("nested/dir/plugin.lock"));
        drop(lock.acquire().await.unwrap());
        let again = tokio::time::timeout(Duration::from_secs(5), lock.acquire()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn serializes_tasks() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = AdvisoryLock::new(tmp.path().join("plugin.lock"));
        let inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = Arc::clone(&inside);
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire().await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }
}
