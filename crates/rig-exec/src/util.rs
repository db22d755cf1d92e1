use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

/// Time a child gets between `SIGTERM` and `SIGKILL`.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Run the child in its own process group and kill it when its handle is dropped.
pub fn isolate(cmd: &mut Command) {
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
}

/// Terminate the child's process group, escalating to `SIGKILL` after `grace`.
#[cfg(unix)]
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let pgid = -(pid as libc::pid_t);

    unsafe { libc::kill(pgid, libc::SIGTERM) };
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        debug!(target: "rig.exec", pid, "child exited after SIGTERM");
        return Ok(());
    }

    debug!(target: "rig.exec", pid, "child ignored SIGTERM; killing group");
    unsafe { libc::kill(pgid, libc::SIGKILL) };
    child.kill().await
}

#[cfg(not(unix))]
pub async fn kill_graceful(child: &mut Child, _grace: Duration) -> std::io::Result<()> {
    child.kill().await
}
