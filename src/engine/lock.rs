// Refresh exclusion: one rebuild at a time, within this process and across processes

use crate::error::{Result, VaultError};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Guards the refresh pipeline with an in-memory flag and a PID lock file
#[derive(Debug)]
pub struct RefreshLock {
    held: AtomicBool,
    lock_file: PathBuf,
}

/// Releases the lock when dropped
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    lock: &'a RefreshLock,
}

impl RefreshLock {
    pub fn new(lock_file: PathBuf) -> Self {
        Self {
            held: AtomicBool::new(false),
            lock_file,
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_file
    }

    /// Whether a refresh is running here or in another live process
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst) || self.owner_alive()
    }

    /// Take the lock without waiting
    ///
    /// Fails with [`VaultError::RefreshInProgress`] when another refresh holds it. A lock
    /// file left by a dead process is reclaimed.
    pub fn try_acquire(&self) -> Result<RefreshGuard<'_>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VaultError::RefreshInProgress);
        }

        match self.create_lock_file() {
            Ok(()) => Ok(RefreshGuard { lock: self }),
            Err(e) => {
                self.held.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn create_lock_file(&self) -> Result<()> {
        if let Some(parent) = self.lock_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VaultError::Io {
                source: e,
                context: format!("Failed to create directory: {:?}", parent),
            })?;
        }

        // The lock file only ever appears with its PID already written
        let staged = self.sibling("tmp");
        std::fs::write(&staged, std::process::id().to_string()).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to write lock file: {:?}", staged),
        })?;
        let result = self.publish(&staged);
        if let Err(e) = std::fs::remove_file(&staged) {
            warn!("Failed to remove {:?}: {}", staged, e);
        }
        result
    }

    fn publish(&self, staged: &Path) -> Result<()> {
        for _ in 0..2 {
            match std::fs::hard_link(staged, &self.lock_file) {
                Ok(()) => {
                    debug!("Acquired refresh lock {:?}", self.lock_file);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.owner() {
                    Owner::Dead(pid) => self.reclaim(pid)?,
                    Owner::Missing => {}
                    Owner::Alive | Owner::Unknown => return Err(VaultError::RefreshInProgress),
                },
                Err(e) => {
                    return Err(VaultError::Io {
                        source: e,
                        context: format!("Failed to create lock file: {:?}", self.lock_file),
                    })
                }
            }
        }

        Err(VaultError::RefreshInProgress)
    }

    /// Move a dead owner's lock aside, restoring it if another process replaced it meanwhile
    fn reclaim(&self, dead: i32) -> Result<()> {
        let aside = self.sibling("stale");
        match std::fs::rename(&self.lock_file, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(VaultError::Io {
                    source: e,
                    context: format!("Failed to move stale lock file: {:?}", self.lock_file),
                })
            }
        }

        let moved = parse_pid(&aside);
        if moved != Some(dead) {
            // Someone else published a fresh lock between our read and the rename
            if std::fs::hard_link(&aside, &self.lock_file).is_err() {
                warn!("Lost a concurrent refresh lock at {:?}", self.lock_file);
            }
            let _ = std::fs::remove_file(&aside);
            return Err(VaultError::RefreshInProgress);
        }

        warn!("Removed stale refresh lock {:?} (pid {})", self.lock_file, dead);
        std::fs::remove_file(&aside).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to remove stale lock file: {:?}", aside),
        })
    }

    /// Unique path next to the lock file
    fn sibling(&self, kind: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut name = self.lock_file.as_os_str().to_os_string();
        name.push(format!(".{}.{}.{}", std::process::id(), n, kind));
        PathBuf::from(name)
    }

    /// PID recorded in the lock file, if any
    fn read_owner(&self) -> Option<i32> {
        parse_pid(&self.lock_file)
    }

    fn owner(&self) -> Owner {
        let contents = match std::fs::read_to_string(&self.lock_file) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Owner::Missing,
            Err(_) => return Owner::Unknown,
        };
        let Ok(pid) = contents.trim().parse::<i32>() else {
            return Owner::Unknown;
        };
        if pid <= 0 {
            return Owner::Unknown;
        }
        // Signal 0 only checks that the process exists; EPERM means it does
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => Owner::Alive,
            Err(_) => Owner::Dead(pid),
        }
    }

    fn owner_alive(&self) -> bool {
        matches!(self.owner(), Owner::Alive | Owner::Unknown)
    }

    fn remove_lock_file(&self) -> Result<()> {
        if self.read_owner() != Some(std::process::id() as i32) {
            warn!("Refresh lock {:?} is not ours, leaving it", self.lock_file);
            return Ok(());
        }
        match std::fs::remove_file(&self.lock_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Io {
                source: e,
                context: format!("Failed to remove lock file: {:?}", self.lock_file),
            }),
        }
    }
}

/// State of whoever the lock file names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Missing,
    Alive,
    Dead(i32),
    /// Empty or unreadable contents; treated as held
    Unknown,
}

fn parse_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.remove_lock_file() {
            warn!("Failed to release refresh lock: {}", e);
        }
        self.lock.held.store(false, Ordering::SeqCst);
        debug!("Released refresh lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let lock = RefreshLock::new(dir.path().join("refresh.lock"));

        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_held());
        assert!(lock.path().exists());
        assert!(matches!(lock.try_acquire(), Err(VaultError::RefreshInProgress)));

        drop(guard);
        assert!(!lock.is_held());
        assert!(!lock.path().exists());
        assert!(lock.try_acquire().is_ok());
    }

    #[test]
    fn test_live_owner_blocks_other_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refresh.lock");
        let first = RefreshLock::new(path.clone());
        let second = RefreshLock::new(path);

        let _guard = first.try_acquire().unwrap();
        assert!(second.is_held());
        assert!(matches!(second.try_acquire(), Err(VaultError::RefreshInProgress)));
    }

    #[test]
    fn test_stale_lock_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refresh.lock");
        // PIDs are capped well below i32::MAX on Linux
        std::fs::write(&path, i32::MAX.to_string()).unwrap();

        let lock = RefreshLock::new(path);
        assert!(!lock.is_held());
        let _guard = lock.try_acquire().unwrap();
        assert_eq!(lock.read_owner(), Some(std::process::id() as i32));
    }

    #[test]
    fn test_empty_or_garbled_lock_file_counts_as_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refresh.lock");
        let lock = RefreshLock::new(path.clone());

        // Another writer may be midway through creating it
        std::fs::write(&path, "").unwrap();
        assert!(lock.is_held());
        assert!(matches!(lock.try_acquire(), Err(VaultError::RefreshInProgress)));
        assert!(path.exists());

        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(lock.try_acquire(), Err(VaultError::RefreshInProgress)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not-a-pid");
    }

    #[test]
    fn test_failed_acquire_leaves_no_staging_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refresh.lock");
        let first = RefreshLock::new(path.clone());
        let second = RefreshLock::new(path);

        let guard = first.try_acquire().unwrap();
        assert!(second.try_acquire().is_err());
        drop(guard);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
