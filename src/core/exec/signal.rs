//! Process-group signalling for executor children.
//!
//! Every invocation runs in its own process group so termination reaches
//! grandchildren (shell wrappers, spawned tools) as well as the CLI itself.
//! ESRCH means the group already died, which is fine. EPERM is logged and skipped
//! rather than treated as fatal.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Send `sig` to the whole process group rooted at `pgid`. Returns `true`
/// if the signal was delivered.
pub(crate) fn send_group_signal(pgid: u32, sig: Signal) -> bool {
    match signal::killpg(Pid::from_raw(pgid as i32), sig) {
        Ok(()) => {
            debug!(pgid, signal = ?sig, "signal sent to process group");
            true
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pgid, signal = ?sig, "process group already gone");
            false
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!(pgid, signal = ?sig, "permission denied signalling group");
            false
        }
        Err(e) => {
            warn!(pgid, signal = ?sig, error = %e, "failed to signal group");
            false
        }
    }
}
