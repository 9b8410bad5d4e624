//! Git and CI host access for the merge phase.
//!
//! [`GhCliHost`] shells out to `git` and the GitHub CLI (`gh`); tests use a
//! scripted host.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ShipyardConfig;
use crate::errors::ToolError;
use crate::util::{strip_ansi, truncate_tail};

/// A CI workflow run on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiRun {
    pub id: String,
    pub url: Option<String>,
}

/// How a watched CI run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiWatch {
    Passed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
}

#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Stage and commit everything. Returns the resulting HEAD commit.
    async fn commit_all(&self, cwd: &Path, message: &str) -> Result<String>;

    async fn push_branch(&self, cwd: &Path, branch: &str) -> Result<()>;

    /// Open a pull request for `branch`, or return the one already open.
    async fn create_pull_request(
        &self,
        cwd: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    /// The CI run for the branch's current head commit, if one shows up.
    async fn latest_ci_run(&self, cwd: &Path, branch: &str) -> Result<Option<CiRun>>;

    async fn watch_ci_run(&self, cwd: &Path, run: &CiRun, timeout: Duration) -> Result<CiWatch>;

    /// Logs of the failed jobs, ANSI-stripped and cut to `max_chars`.
    async fn failed_logs(&self, cwd: &Path, run: &CiRun, max_chars: usize) -> Result<String>;
}

pub struct GhCliHost {
    /// Delay between CI status polls.
    pub poll_interval: Duration,
    /// How many polls to wait for a run to appear after a push.
    pub discovery_attempts: u32,
    /// Deadline for each `git`/`gh` invocation.
    pub command_timeout: Duration,
}

impl Default for GhCliHost {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            discovery_attempts: 6,
            command_timeout: Duration::from_secs(300),
        }
    }
}

impl GhCliHost {
    pub fn from_config(config: &ShipyardConfig) -> Self {
        Self {
            command_timeout: config.toml.ci.command_timeout(),
            ..Self::default()
        }
    }

    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String> {
        run_tool(program, args, cwd, self.command_timeout).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRun {
    database_id: u64,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhRunStatus {
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhPr {
    url: String,
    number: u64,
}

/// Run `program` to completion within `timeout`. The child is killed when
/// the deadline passes or the future is dropped.
async fn run_tool(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String> {
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to run {} {}", program, args.join(" ")))?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            output.with_context(|| format!("Failed to run {} {}", program, args.join(" ")))?
        }
        Err(_) => {
            let command = format!("{} {}", program, args.join(" "));
            warn!(command = %command, seconds = timeout.as_secs(), "host command timed out, killed");
            return Err(ToolError::Timeout {
                command,
                seconds: timeout.as_secs(),
            }
            .into());
        }
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} {} failed: {}", program, args.join(" "), stderr.trim());
    }
    String::from_utf8(output.stdout).context("Invalid UTF-8 in command output")
}

/// HEAD commit of the repository at `cwd`.
pub fn head_commit(cwd: &Path) -> Result<String> {
    let repo = git2::Repository::discover(cwd)
        .with_context(|| format!("Not a git repository: {}", cwd.display()))?;
    let commit = repo
        .head()
        .context("Repository has no HEAD")?
        .peel_to_commit()
        .context("HEAD is not a commit")?;
    Ok(commit.id().to_string())
}

/// Check out `branch` in the repository at `cwd`, creating it from HEAD when
/// it does not exist yet. Uncommitted changes are carried over.
pub fn ensure_branch(cwd: &Path, branch: &str) -> Result<()> {
    let repo = git2::Repository::discover(cwd)
        .with_context(|| format!("Not a git repository: {}", cwd.display()))?;
    let refname = format!("refs/heads/{}", branch);
    if repo.head().ok().and_then(|h| h.name().map(str::to_string)).as_deref() == Some(refname.as_str()) {
        return Ok(());
    }
    if repo.find_branch(branch, git2::BranchType::Local).is_err() {
        let head = repo
            .head()
            .context("Repository has no HEAD")?
            .peel_to_commit()
            .context("HEAD is not a commit")?;
        repo.branch(branch, &head, false)
            .with_context(|| format!("Failed to create branch {}", branch))?;
        info!(branch, "created feature branch");
    }
    let target = repo
        .revparse_single(&refname)
        .with_context(|| format!("Failed to resolve {}", refname))?;
    repo.checkout_tree(&target, Some(git2::build::CheckoutBuilder::new().safe()))
        .with_context(|| format!("Failed to check out {}", branch))?;
    repo.set_head(&refname)
        .with_context(|| format!("Failed to switch HEAD to {}", branch))?;
    Ok(())
}

/// Parse the trailing number of a pull request URL.
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl RepoHost for GhCliHost {
    async fn commit_all(&self, cwd: &Path, message: &str) -> Result<String> {
        self.run("git", &["add", "-A"], cwd).await?;
        let status = self.run("git", &["status", "--porcelain"], cwd).await?;
        if status.trim().is_empty() {
            debug!("nothing to commit");
        } else {
            self.run("git", &["commit", "-m", message], cwd).await?;
        }
        head_commit(cwd)
    }

    async fn push_branch(&self, cwd: &Path, branch: &str) -> Result<()> {
        self.run("git", &["push", "-u", "origin", branch], cwd).await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        cwd: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        if let Ok(existing) = self.run("gh", &["pr", "view", branch, "--json", "url,number"], cwd).await
            && let Ok(pr) = serde_json::from_str::<GhPr>(&existing)
        {
            info!(url = %pr.url, "reusing open pull request");
            return Ok(PullRequest {
                url: pr.url,
                number: pr.number,
            });
        }
        let out = self.run(
            "gh",
            &["pr", "create", "--head", branch, "--title", title, "--body", body],
            cwd,
        )
        .await?;
        let url = out
            .lines()
            .rev()
            .find(|l| l.starts_with("http"))
            .context("gh pr create printed no URL")?
            .trim()
            .to_string();
        let number = pr_number_from_url(&url)
            .with_context(|| format!("Could not parse PR number from {}", url))?;
        Ok(PullRequest { url, number })
    }

    async fn latest_ci_run(&self, cwd: &Path, branch: &str) -> Result<Option<CiRun>> {
        let sha = head_commit(cwd)?;
        for attempt in 0..self.discovery_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            let out = self.run(
                "gh",
                &[
                    "run", "list", "--branch", branch, "--commit", &sha, "--limit", "1", "--json",
                    "databaseId,url",
                ],
                cwd,
            )
            .await?;
            let runs: Vec<GhRun> =
                serde_json::from_str(&out).context("Failed to parse gh run list output")?;
            if let Some(run) = runs.into_iter().next() {
                return Ok(Some(CiRun {
                    id: run.database_id.to_string(),
                    url: run.url,
                }));
            }
        }
        Ok(None)
    }

    async fn watch_ci_run(&self, cwd: &Path, run: &CiRun, timeout: Duration) -> Result<CiWatch> {
        let poll = async {
            loop {
                let out = self.run(
                    "gh",
                    &["run", "view", &run.id, "--json", "status,conclusion"],
                    cwd,
                )
                .await?;
                let status: GhRunStatus =
                    serde_json::from_str(&out).context("Failed to parse gh run view output")?;
                if status.status == "completed" {
                    let passed = matches!(status.conclusion.as_deref(), Some("success") | Some("skipped"));
                    return Ok::<_, anyhow::Error>(if passed { CiWatch::Passed } else { CiWatch::Failed });
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Ok(CiWatch::TimedOut),
        }
    }

    async fn failed_logs(&self, cwd: &Path, run: &CiRun, max_chars: usize) -> Result<String> {
        let out = self.run("gh", &["run", "view", &run.id, "--log-failed"], cwd).await?;
        Ok(truncate_tail(&strip_ansi(&out), max_chars))
    }
}
