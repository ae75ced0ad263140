//! Cross-process session exclusion.
//!
//! One exclusive flock per state directory. The fd is opened close-on-exec
//! so a crashed or forked child (an executor that outlives us, a daemon
//! respawn) can never retain the lock and wedge future sessions.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

pub const LOCK_FILE: &str = "session.lock";

/// Held for the duration of one supervisor run; dropping releases the lock.
pub struct SessionLock {
    _lock: Flock<std::fs::File>,
}

impl SessionLock {
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILE);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .custom_flags(nix::libc::O_CLOEXEC)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = %path.display(), "session lock acquired");
                Ok(Self { _lock: lock })
            }
            Err((_, errno)) => Err(anyhow!(
                "another supervisor holds the session lock at {}: {errno}",
                path.display()
            )),
        }
    }
}
