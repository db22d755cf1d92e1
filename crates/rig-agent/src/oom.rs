//! Detection of processes killed by the kernel out-of-memory killer.
use std::{io, process::Stdio};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait OomTracker: Send + Sync {
    /// Forget kernel messages seen so far.
    async fn clear(&self) -> io::Result<()>;

    /// Scan for OOM kills since the last [`clear`](OomTracker::clear).
    async fn check(&self) -> io::Result<()>;

    /// Matching log lines and the killed pids found by the last check.
    fn report(&self) -> (Vec<String>, Vec<i32>);
}

/// Tracker that never reports anything.
#[derive(Debug, Default)]
pub struct NoopOomTracker;

#[async_trait]
impl OomTracker for NoopOomTracker {
    async fn clear(&self) -> io::Result<()> {
        Ok(())
    }

    async fn check(&self) -> io::Result<()> {
        Ok(())
    }

    fn report(&self) -> (Vec<String>, Vec<i32>) {
        (Vec::new(), Vec::new())
    }
}

/// Reads the kernel ring buffer through `dmesg`. Clearing needs the privileges `dmesg -c` needs.
#[derive(Debug, Default)]
pub struct DmesgOomTracker {
    found: Mutex<(Vec<String>, Vec<i32>)>,
}

impl DmesgOomTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn dmesg(args: &[&str]) -> io::Result<String> {
    let out = Command::new("dmesg")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    if !out.status.success() {
        return Err(io::Error::other(format!(
            "dmesg {} exited with {}",
            args.join(" "),
            out.status
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[async_trait]
impl OomTracker for DmesgOomTracker {
    async fn clear(&self) -> io::Result<()> {
        *self.found.lock() = (Vec::new(), Vec::new());
        dmesg(&["-c"]).await.map(|_| ())
    }

    async fn check(&self) -> io::Result<()> {
        let output = dmesg(&[]).await?;
        let found = parse_oom_kills(&output);
        debug!(target: "rig.agent.oom", lines = found.0.len(), pids = ?found.1, "oom check");
        *self.found.lock() = found;
        Ok(())
    }

    fn report(&self) -> (Vec<String>, Vec<i32>) {
        self.found.lock().clone()
    }
}

/// Lines mentioning the OOM killer and the pids of the processes it killed.
pub fn parse_oom_kills(output: &str) -> (Vec<String>, Vec<i32>) {
    let mut lines = Vec::new();
    let mut pids = Vec::new();

    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        if !lower.contains("out of memory") && !lower.contains("killed process") {
            continue;
        }
        lines.push(line.to_string());

        if let Some(pid) = lower
            .split_once("killed process ")
            .and_then(|(_, rest)| {
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                digits.parse::<i32>().ok()
            })
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }
    }
    (lines, pids)
}
