//! OS power actions. Only ever invoked from the poll-loop thread; the
//! runtime marks availability offline (and flushes) before calling in here.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::info;

/// Settle time after `systemctl suspend` returns. The process is frozen for
/// the actual sleep; this covers wake-up before availability goes back
/// online.
const RESUME_SETTLE: Duration = Duration::from_secs(10);

/// Suspend the machine and block until it has resumed.
pub async fn suspend() -> Result<()> {
    let status = Command::new("systemctl")
        .arg("suspend")
        .status()
        .await
        .context("failed to invoke systemctl suspend")?;
    if !status.success() {
        bail!("systemctl suspend exited with {status}");
    }
    tokio::time::sleep(RESUME_SETTLE).await;
    info!("system resumed");
    Ok(())
}

/// Schedule a poweroff in `delay_secs` seconds, detached from this process
/// so the command outlives our own shutdown. The delay gives the broker time
/// to deliver the retained offline state.
pub fn schedule_poweroff(delay_secs: u64) -> Result<()> {
    info!("powering off");
    std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("sleep {delay_secs} && poweroff"))
        .spawn()
        .context("failed to spawn poweroff command")?;
    Ok(())
}
