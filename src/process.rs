//! Worker process control.
//!
//! The lifecycle manager starts, probes and signals worker processes only
//! through [`ProcessControl`], so it can be tested without real processes.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::debug;

use crate::graph::ResumeSignal;

/// What a spawned worker should do.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub run_id: String,
    /// Continue from the thread's checkpoint instead of starting fresh.
    pub resume: bool,
    /// Decision to deliver to the phase waiting for approval.
    pub signal: Option<ResumeSignal>,
}

impl WorkerSpec {
    pub fn start(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            resume: false,
            signal: None,
        }
    }

    pub fn resume(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            resume: true,
            signal: None,
        }
    }

    pub fn with_signal(run_id: &str, signal: ResumeSignal) -> Self {
        Self {
            run_id: run_id.to_string(),
            resume: true,
            signal: Some(signal),
        }
    }

    /// Arguments for `shipyard worker`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["worker".to_string(), "--run-id".to_string(), self.run_id.clone()];
        match &self.signal {
            Some(ResumeSignal::Approved) => {
                args.extend(["--resume".to_string(), "approved".to_string()]);
            }
            Some(ResumeSignal::Rejected { feedback }) => {
                args.extend([
                    "--resume".to_string(),
                    "rejected".to_string(),
                    "--feedback".to_string(),
                    feedback.clone(),
                ]);
            }
            None if self.resume => {
                args.extend(["--resume".to_string(), "continue".to_string()]);
            }
            None => {}
        }
        args
    }
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Start a detached worker and return its pid.
    fn spawn_worker(&self, spec: &WorkerSpec) -> Result<u32>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the process to shut down gracefully (SIGTERM).
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Wait up to `timeout` for the process to exit. True when it did.
    async fn wait_exit(&self, pid: u32, timeout: Duration) -> bool;
}

/// Check if a process with the given PID is alive.
///
/// Sends the null signal: `EPERM` means the process exists but belongs to
/// someone else, `ESRCH` means it does not exist.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    if pid_i32 <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid_i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => false,
    }
}

/// SIGTERM `pid`. A process that is already gone is not an error.
pub fn send_sigterm(pid: u32) -> Result<()> {
    let pid_i32 = i32::try_from(pid).context("pid out of range")?;
    match kill(Pid::from_raw(pid_i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to signal process {}: {}", pid, e)),
    }
}

/// Spawns `shipyard worker` processes from the current executable.
pub struct OsProcessControl {
    home: PathBuf,
    log_dir: PathBuf,
}

impl OsProcessControl {
    pub fn new(home: PathBuf, log_dir: PathBuf) -> Self {
        Self { home, log_dir }
    }
}

#[async_trait]
impl ProcessControl for OsProcessControl {
    fn spawn_worker(&self, spec: &WorkerSpec) -> Result<u32> {
        let exe = std::env::current_exe().context("Failed to locate shipyard executable")?;
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("Failed to create {}", self.log_dir.display()))?;
        let out_path = self.log_dir.join(format!("{}.out", spec.run_id));
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&out_path)
            .with_context(|| format!("Failed to open {}", out_path.display()))?;
        let err = out.try_clone().context("Failed to clone worker output handle")?;

        let mut child = Command::new(exe)
            .args(spec.to_args())
            .env("SHIPYARD_HOME", &self.home)
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .process_group(0)
            .spawn()
            .context("Failed to spawn worker process")?;
        let pid = child.id();
        debug!(pid, run_id = %spec.run_id, "spawned worker");

        // Reap the child if this process outlives it, so it never lingers as a
        // zombie that still answers the liveness probe.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        send_sigterm(pid)
    }

    async fn wait_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while is_process_alive(pid) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }
}
