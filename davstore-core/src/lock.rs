//! Reader/writer locks shared between threads and processes.
//!
//! [`FileLock`] takes an advisory `flock` on a lock file, which excludes other
//! processes as well as other threads of this process (every acquisition
//! opens its own file description). [`MemoryLock`] provides the same contract
//! without touching the filesystem.
//!
//! Both keep a [`LockState`] counter so that code holding a lock can ask in
//! which mode the lock is currently held.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};

use fs2::FileExt;

use crate::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "r"),
            LockMode::Write => write!(f, "w"),
        }
    }
}

/// A blocking reader/writer lock.
///
/// `acquire` suspends the caller until the lock is granted; the returned guard
/// releases it on drop. Acquisition is not reentrant.
pub trait LockManager: Send + Sync {
    fn acquire(&self, mode: LockMode) -> StoreResult<LockGuard<'_>>;

    /// Mode the lock is currently held in by this process, if any.
    fn locked(&self) -> Option<LockMode>;
}

#[derive(Default)]
struct Holders {
    readers: usize,
    writer: bool,
}

/// In-process view of who holds a lock.
#[derive(Default)]
pub struct LockState {
    holders: Mutex<Holders>,
    released: Condvar,
}

impl LockState {
    fn holders(&self) -> MutexGuard<'_, Holders> {
        self.holders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a holder, waiting while the mode conflicts with current holders.
    fn enter(&self, mode: LockMode) {
        let mut holders = self.holders();
        loop {
            let conflict = match mode {
                LockMode::Read => holders.writer,
                LockMode::Write => holders.writer || holders.readers > 0,
            };
            if !conflict {
                break;
            }
            holders = self
                .released
                .wait(holders)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        match mode {
            LockMode::Read => holders.readers += 1,
            LockMode::Write => holders.writer = true,
        }
    }

    fn leave(&self, mode: LockMode) {
        let mut holders = self.holders();
        match mode {
            LockMode::Read => holders.readers = holders.readers.saturating_sub(1),
            LockMode::Write => holders.writer = false,
        }
        drop(holders);
        self.released.notify_all();
    }

    pub fn locked(&self) -> Option<LockMode> {
        let holders = self.holders();
        if holders.readers > 0 {
            Some(LockMode::Read)
        } else if holders.writer {
            Some(LockMode::Write)
        } else {
            None
        }
    }
}

/// Releases the lock when dropped.
pub struct LockGuard<'a> {
    state: &'a LockState,
    mode: LockMode,
    // Dropped after `Drop::drop` has left the state, so the OS lock is
    // released last.
    _file: Option<File>,
}

impl LockGuard<'_> {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.state.leave(self.mode);
    }
}

/// Lock backed by an advisory lock on `path`.
pub struct FileLock {
    path: PathBuf,
    state: LockState,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLock {
            path: path.into(),
            state: LockState::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LockManager for FileLock {
    fn acquire(&self, mode: LockMode) -> StoreResult<LockGuard<'_>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        match mode {
            LockMode::Read => FileExt::lock_shared(&file)?,
            LockMode::Write => FileExt::lock_exclusive(&file)?,
        }
        self.state.enter(mode);

        Ok(LockGuard {
            state: &self.state,
            mode,
            _file: Some(file),
        })
    }

    fn locked(&self) -> Option<LockMode> {
        self.state.locked()
    }
}

/// Lock that only excludes threads of this process.
#[derive(Default)]
pub struct MemoryLock {
    state: LockState,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for MemoryLock {
    fn acquire(&self, mode: LockMode) -> StoreResult<LockGuard<'_>> {
        self.state.enter(mode);
        Ok(LockGuard {
            state: &self.state,
            mode,
            _file: None,
        })
    }

    fn locked(&self) -> Option<LockMode> {
        self.state.locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn check_readers_share(lock: Arc<dyn LockManager>) {
        let first = lock.acquire(LockMode::Read).unwrap();
        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _second = other.acquire(LockMode::Read).unwrap();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("second reader should not block");
        handle.join().unwrap();
        assert_eq!(lock.locked(), Some(LockMode::Read));
        drop(first);
        assert_eq!(lock.locked(), None);
    }

    fn check_writer_waits_for_readers(lock: Arc<dyn LockManager>) {
        let reader = lock.acquire(LockMode::Read).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let other = Arc::clone(&lock);
        let flag = Arc::clone(&acquired);
        let handle = thread::spawn(move || {
            let guard = other.acquire(LockMode::Write).unwrap();
            flag.store(true, Ordering::SeqCst);
            assert_eq!(other.locked(), Some(LockMode::Write));
            drop(guard);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(reader);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(lock.locked(), None);
    }

    #[test]
    fn test_file_lock_readers_share() {
        let dir = tempfile::tempdir().unwrap();
        check_readers_share(Arc::new(FileLock::new(dir.path().join(".engine.lock"))));
    }

    #[test]
    fn test_file_lock_writer_waits_for_readers() {
        let dir = tempfile::tempdir().unwrap();
        check_writer_waits_for_readers(Arc::new(FileLock::new(dir.path().join(".engine.lock"))));
    }

    #[test]
    fn test_memory_lock_readers_share() {
        check_readers_share(Arc::new(MemoryLock::new()));
    }

    #[test]
    fn test_memory_lock_writer_waits_for_readers() {
        check_writer_waits_for_readers(Arc::new(MemoryLock::new()));
    }

    #[test]
    fn test_guard_released_on_error_path() {
        fn failing(lock: &dyn LockManager) -> StoreResult<()> {
            let _guard = lock.acquire(LockMode::Write)?;
            Err(std::io::Error::other("boom").into())
        }

        let lock = MemoryLock::new();
        assert!(failing(&lock).is_err());
        assert_eq!(lock.locked(), None);
        let _again = lock.acquire(LockMode::Write).unwrap();
    }
}
