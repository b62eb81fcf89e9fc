//! Single-instance lock backed by a pid file.
//!
//! A pid file whose process is gone is stale and gets replaced, so a killed
//! run never blocks the next one.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

static ACQUIRE_ATTEMPTS: usize = 3;
/// A pid file without a readable pid is only stale once it is this old.
static STALE_GRACE: Duration = Duration::from_secs(10);
static RETRY_PAUSE: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub struct PidLock {
    path: PathBuf,
}

/// Held lock. The pid file is removed when the guard drops.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    pid: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum Holder {
    Missing,
    Pid(u32),
    Unreadable { age: Duration },
}

impl PidLock {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// Takes the lock or fails with [`Error::AlreadyRunning`] while the holder is alive.
    ///
    /// The pid is written to a temporary file first and then linked into
    /// place, so the pid file never exists without its content.
    #[named]
    pub fn acquire(&self) -> Result<LockGuard> {
        let pid = std::process::id();
        for _ in 0..ACQUIRE_ATTEMPTS {
            let mut staged = NamedTempFile::new_in(self.dir())
                .map_err(Error::from)
                .add_msg(format!("Creating pid file next to {:?} failed", self.path))
                .add_fn_name(function_path!())?;
            writeln!(staged, "{pid}")
                .and_then(|_| staged.as_file().sync_all())
                .map_err(Error::from)
                .add_msg(format!("Writing pid file {:?} failed", self.path))
                .add_fn_name(function_path!())?;

            let err = match staged.persist_noclobber(&self.path) {
                Ok(_) => {
                    tracing::debug!("Acquired lock {:?} for pid {pid}", self.path);
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        pid,
                    });
                }
                Err(e) => e.error,
            };
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(Error::from(err))
                    .add_msg(format!("Creating pid file {:?} failed", self.path))
                    .add_fn_name(function_path!());
            }

            match self.holder().add_fn_name(function_path!())? {
                Holder::Missing => continue,
                Holder::Pid(holder) if holder != pid && is_alive(holder) => {
                    return Err(Error::already_running(holder));
                }
                Holder::Unreadable { age } if age < STALE_GRACE => {
                    tracing::debug!("Pid file {:?} has no pid yet, waiting", self.path);
                    std::thread::sleep(RETRY_PAUSE);
                    continue;
                }
                _ => {}
            }
            tracing::warn!("Removing stale pid file {:?}", self.path);
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::from(e))
                        .add_msg(format!("Removing stale pid file {:?} failed", self.path))
                        .add_fn_name(function_path!())
                }
            }
        }

        if let Holder::Unreadable { .. } = self.holder()? {
            return Err(Error::lock_unreadable(self.path.clone()));
        }
        Err(Error::from(std::io::Error::other(
            "pid file keeps reappearing",
        )))
        .add_msg(format!("Locking {:?} failed", self.path))
        .add_fn_name(function_path!())
    }

    fn holder(&self) -> Result<Holder> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Holder::Missing),
            Err(e) => return Err(e.into()),
        };
        if let Ok(pid) = text.trim().parse::<u32>() {
            return Ok(Holder::Pid(pid));
        }
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Holder::Missing),
            Err(e) => return Err(e.into()),
        };
        // an mtime in the future counts as fresh
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        Ok(Holder::Unreadable { age })
    }
}

impl LockGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let owned = std::fs::read_to_string(&self.path)
            .map(|text| text.trim() == self.pid.to_string())
            .unwrap_or(false);
        if !owned {
            tracing::warn!("Pid file {:?} no longer ours, leaving it", self.path);
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::error!("Removing pid file {:?} failed: {e}", self.path);
        }
    }
}

/// Signal 0 only checks for existence; EPERM still means the process exists.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));

        let guard = lock.acquire().unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
        assert_eq!(guard.pid(), std::process::id());

        drop(guard);
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_live_holder_blocks() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        // init is always alive
        std::fs::write(lock.path(), "1\n").unwrap();

        match lock.acquire() {
            Err(Error::AlreadyRunning { pid }) => assert_eq!(pid, 1),
            other => panic!("Expected AlreadyRunning, got {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(lock.path()).unwrap(), "1\n");
    }

    #[test]
    fn test_stale_holder_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        std::fs::write(lock.path(), format!("{}\n", dead_pid())).unwrap();

        let guard = lock.acquire().unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), guard.pid().to_string());
    }

    fn age(path: &Path, by: Duration) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn test_old_garbage_pid_file_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        std::fs::write(lock.path(), "not a pid").unwrap();
        age(lock.path(), Duration::from_secs(60));

        let guard = lock.acquire().unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), guard.pid().to_string());
    }

    #[test]
    fn test_fresh_empty_pid_file_blocks() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        // another instance between creating the file and writing its pid
        std::fs::write(lock.path(), "").unwrap();

        match lock.acquire() {
            Err(Error::LockUnreadable { path }) => assert_eq!(path, lock.path()),
            other => panic!("Expected LockUnreadable, got {other:?}"),
        }
        assert!(lock.path().exists());
        assert_eq!(std::fs::read_to_string(lock.path()).unwrap(), "");
    }

    #[test]
    fn test_holder_reads_pid_and_age() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        assert_eq!(lock.holder().unwrap(), Holder::Missing);

        std::fs::write(lock.path(), "42\n").unwrap();
        assert_eq!(lock.holder().unwrap(), Holder::Pid(42));

        std::fs::write(lock.path(), "").unwrap();
        age(lock.path(), Duration::from_secs(60));
        match lock.holder().unwrap() {
            Holder::Unreadable { age } => assert!(age >= Duration::from_secs(59)),
            other => panic!("Expected Unreadable, got {other:?}"),
        }
    }

    #[test]
    fn test_acquire_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        std::fs::write(lock.path(), "1\n").unwrap();
        assert!(lock.acquire().is_err());
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("run.pid")]);
    }

    #[test]
    fn test_guard_leaves_foreign_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let lock = PidLock::new(temp_dir.path().join("run.pid"));
        let guard = lock.acquire().unwrap();
        std::fs::write(lock.path(), "1\n").unwrap();
        drop(guard);
        assert!(lock.path().exists());
    }

    #[test]
    fn test_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(dead_pid()));
        assert!(!is_alive(0));
    }
}
