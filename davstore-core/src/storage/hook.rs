use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use crate::error::{StoreError, StoreResult};
use crate::lock::{LockGuard, LockMode};

/// Quote `s` for a POSIX shell, leaving plain words untouched.
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// The configured storage hook, bound to the user of a lock scope.
#[derive(Debug, Clone)]
pub(crate) struct Hook {
    command: String,
    folder: PathBuf,
}

impl Hook {
    pub(crate) fn new(template: &str, folder: &Path, user: Option<&str>) -> Self {
        let user = shell_quote(user.unwrap_or("Anonymous"));
        Hook {
            command: template.replace("%(user)s", &user),
            folder: folder.to_path_buf(),
        }
    }

    fn run(&self) -> StoreResult<()> {
        debug!("Running storage hook: {:?}", self.command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.folder)
            .stdin(Stdio::null())
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("Captured stdout from hook:\n{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!("Captured stderr from hook:\n{}", stderr.trim_end());
        }

        if !output.status.success() {
            return Err(StoreError::Hook(format!(
                "{:?} exited with status {}",
                self.command,
                output.status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

/// A held storage lock.
///
/// Dropping it releases the lock. [`StorageLock::commit`] ends a write scope
/// successfully, running the storage hook before the lock is released.
pub struct StorageLock<'a> {
    guard: LockGuard<'a>,
    hook: Option<Hook>,
}

impl<'a> StorageLock<'a> {
    pub(crate) fn new(guard: LockGuard<'a>, hook: Option<Hook>) -> Self {
        StorageLock { guard, hook }
    }

    pub fn mode(&self) -> LockMode {
        self.guard.mode()
    }

    /// Finish the scope. Runs the hook for write scopes, then releases the lock.
    pub fn commit(self) -> StoreResult<()> {
        let StorageLock { guard, hook } = self;
        let result = match &hook {
            Some(hook) if guard.mode() == LockMode::Write => hook.run(),
            _ => Ok(()),
        };
        drop(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockManager, MemoryLock};

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("alice"), "alice");
        assert_eq!(shell_quote("alice@example.com"), "alice@example.com");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_hook_substitutes_user() {
        let hook = Hook::new("git commit -m %(user)s", Path::new("/tmp"), Some("bob smith"));
        assert_eq!(hook.command, "git commit -m 'bob smith'");
        let anonymous = Hook::new("echo %(user)s", Path::new("/tmp"), None);
        assert_eq!(anonymous.command, "echo Anonymous");
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_runs_hook_in_storage_folder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = MemoryLock::new();

        let hook = Hook::new("echo %(user)s > hook.out", dir.path(), Some("alice"));
        let scope = StorageLock::new(lock.acquire(LockMode::Write).unwrap(), Some(hook));
        scope.commit().unwrap();

        let out = std::fs::read_to_string(dir.path().join("hook.out")).unwrap();
        assert_eq!(out.trim(), "alice");
        assert_eq!(lock.locked(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_hook_is_reported_and_lock_released() {
        let dir = tempfile::tempdir().unwrap();
        let lock = MemoryLock::new();

        let hook = Hook::new("exit 3", dir.path(), None);
        let scope = StorageLock::new(lock.acquire(LockMode::Write).unwrap(), Some(hook));
        assert!(matches!(scope.commit(), Err(StoreError::Hook(_))));
        assert_eq!(lock.locked(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_dropped_scope_skips_hook() {
        let dir = tempfile::tempdir().unwrap();
        let lock = MemoryLock::new();

        let hook = Hook::new("touch hook.out", dir.path(), None);
        drop(StorageLock::new(lock.acquire(LockMode::Write).unwrap(), Some(hook)));
        assert!(!dir.path().join("hook.out").exists());
    }
}
