//! Crash-safe file and directory replacement.
//!
//! Files are written to a temporary sibling, flushed (and optionally fsynced)
//! and renamed over the destination. Whole directories are swapped with
//! [`AtomicWriter::exchange_directory`].

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::debug;

use crate::constants::TMP_PREFIX;
use crate::error::{StoreError, StoreResult};

/// How a populated directory is swapped over an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStrategy {
    /// `renameat2(RENAME_EXCHANGE)`, a single atomic syscall.
    Renameat2,
    /// Move the destination aside, move the source in, move the old
    /// destination to the source's name.
    ThreeStep,
}

impl ExchangeStrategy {
    /// The best strategy the platform supports.
    pub fn detect() -> Self {
        if cfg!(target_os = "linux") {
            ExchangeStrategy::Renameat2
        } else {
            ExchangeStrategy::ThreeStep
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AtomicWriter {
    fsync: bool,
    strategy: ExchangeStrategy,
}

impl AtomicWriter {
    pub fn new(fsync: bool) -> Self {
        Self::with_strategy(fsync, ExchangeStrategy::detect())
    }

    pub fn with_strategy(fsync: bool, strategy: ExchangeStrategy) -> Self {
        AtomicWriter { fsync, strategy }
    }

    pub fn strategy(&self) -> ExchangeStrategy {
        self.strategy
    }

    /// Atomically replace `path` with `bytes`.
    pub fn replace_file(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let parent = parent_dir(path)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(parent)?;

        tmp.write_all(bytes)?;
        tmp.flush()?;
        self.fsync_file(tmp.as_file(), path)?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

        self.sync_directory(parent)
    }

    /// fsync an open file if durability is enabled.
    pub fn fsync_file(&self, file: &File, name: &Path) -> StoreResult<()> {
        if !self.fsync {
            return Ok(());
        }
        file.sync_all().map_err(|e| {
            StoreError::Durability(format!("Fsync'ing file {:?} failed: {e}", name.display()))
        })
    }

    /// fsync a directory so that renames inside it are durable.
    pub fn sync_directory(&self, path: &Path) -> StoreResult<()> {
        if !self.fsync || !cfg!(unix) {
            return Ok(());
        }
        File::open(path)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| {
                StoreError::Durability(format!(
                    "Fsync'ing directory {:?} failed: {e}",
                    path.display()
                ))
            })
    }

    /// Create `path` and all missing parents, syncing each parent.
    pub fn makedirs_synced(&self, path: &Path) -> StoreResult<()> {
        if path.is_dir() {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.makedirs_synced(parent)?;
            match std::fs::create_dir(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {}
                Err(e) => return Err(e.into()),
            }
            self.sync_directory(parent)
        } else {
            std::fs::create_dir_all(path)?;
            Ok(())
        }
    }

    /// Install the fully populated directory `src` at `dest`.
    ///
    /// If `dest` exists the two are exchanged and the old content ends up at
    /// `src`; otherwise `src` is renamed into place. Either way `dest` is
    /// always fully old or fully new.
    pub fn exchange_directory(&self, src: &Path, dest: &Path) -> StoreResult<()> {
        if std::fs::symlink_metadata(dest).is_err() {
            std::fs::rename(src, dest)?;
            return Ok(());
        }

        match self.strategy {
            ExchangeStrategy::Renameat2 => match rename_exchange(src, dest) {
                Ok(()) => Ok(()),
                Err(e) if exchange_unsupported(&e) => {
                    debug!("renameat2 unsupported ({e}), falling back to three-step exchange");
                    three_step_exchange(src, dest)
                }
                Err(e) => Err(e.into()),
            },
            ExchangeStrategy::ThreeStep => three_step_exchange(src, dest),
        }
    }
}

fn parent_dir(path: &Path) -> StoreResult<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| StoreError::UnsafePath(path.display().to_string()))
}

fn exchange_unsupported(e: &std::io::Error) -> bool {
    #[cfg(target_os = "linux")]
    let by_errno = matches!(e.raw_os_error(), Some(libc::ENOSYS) | Some(libc::EINVAL));
    #[cfg(not(target_os = "linux"))]
    let by_errno = false;

    by_errno || e.kind() == std::io::ErrorKind::Unsupported
}

#[cfg(target_os = "linux")]
fn rename_exchange(src: &Path, dest: &Path) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const RENAME_EXCHANGE: libc::c_uint = 1 << 1;

    let to_cstring = |path: &Path| {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    };
    let src = to_cstring(src)?;
    let dest = to_cstring(dest)?;

    // SAFETY: both paths are valid NUL-terminated strings that outlive the call.
    let result = unsafe {
        libc::syscall(
            libc::SYS_renameat2,
            libc::AT_FDCWD,
            src.as_ptr(),
            libc::AT_FDCWD,
            dest.as_ptr(),
            RENAME_EXCHANGE,
        )
    };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn rename_exchange(_src: &Path, _dest: &Path) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

fn three_step_exchange(src: &Path, dest: &Path) -> StoreResult<()> {
    let src_dir = parent_dir(src)?;
    let tmp = tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .tempdir_in(src_dir)?;
    let interim = tmp.path().join("interim");

    std::fs::rename(dest, &interim)?;
    if let Err(e) = std::fs::rename(src, dest) {
        // Put the old destination back before reporting.
        std::fs::rename(&interim, dest)?;
        return Err(e.into());
    }
    std::fs::rename(&interim, src)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path, name: &str, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_replace_file_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item.ics");
        let writer = AtomicWriter::new(true);

        writer.replace_file(&path, b"first").unwrap();
        writer.replace_file(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    fn check_exchange(strategy: ExchangeStrategy) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join(".engine.tmp-new");
        let dest = dir.path().join("cal");
        populate(&src, "new.ics", "new");
        populate(&dest, "old.ics", "old");

        AtomicWriter::with_strategy(false, strategy)
            .exchange_directory(&src, &dest)
            .unwrap();

        assert!(dest.join("new.ics").is_file());
        assert!(!dest.join("old.ics").exists());
        assert!(src.join("old.ics").is_file());
    }

    #[test]
    fn test_exchange_with_detected_strategy() {
        check_exchange(ExchangeStrategy::detect());
    }

    #[test]
    fn test_exchange_with_three_step_fallback() {
        check_exchange(ExchangeStrategy::ThreeStep);
    }

    #[test]
    fn test_exchange_into_missing_destination_renames() {
        for strategy in [ExchangeStrategy::detect(), ExchangeStrategy::ThreeStep] {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join(".engine.tmp-new");
            let dest = dir.path().join("cal");
            populate(&src, "new.ics", "new");

            AtomicWriter::with_strategy(false, strategy)
                .exchange_directory(&src, &dest)
                .unwrap();

            assert!(dest.join("new.ics").is_file());
            assert!(!src.exists());
        }
    }

    #[test]
    fn test_makedirs_synced_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        let writer = AtomicWriter::new(true);

        writer.makedirs_synced(&deep).unwrap();
        writer.makedirs_synced(&deep).unwrap();
        assert!(deep.is_dir());
    }
}
