//! Merge phase: commit, push, open the pull request and see CI through.

use shipyard_common::{CiStatus, PrStatus, PrSummary};
use tracing::{info, warn};

use crate::errors::GraphError;
use crate::executor::AgentExecutor;
use crate::executor::ExecuteOptions;

use super::GraphConfig;
use super::ci::CiLoop;
use super::host::RepoHost;
use super::prompts::{commit_message, pr_body};
use super::report::RunReporter;
use super::state::GraphState;

pub struct MergeNode<'a> {
    pub host: &'a dyn RepoHost,
    pub fixer: &'a dyn AgentExecutor,
    pub reporter: &'a dyn RunReporter,
    pub config: &'a GraphConfig,
    pub options: ExecuteOptions,
}

impl MergeNode<'_> {
    /// Opening a PR implies pushing the branch. CI is only watched for
    /// pushed branches.
    pub async fn execute(&self, state: &mut GraphState) -> Result<(), GraphError> {
        state.ci_fix_attempts = 0;
        let cwd = state.worktree_path.clone();

        let sha = self
            .host
            .commit_all(&cwd, &commit_message(state))
            .await
            .map_err(GraphError::Other)?;
        info!(commit = %sha, "committed feature changes");
        state.commit_hash = Some(sha);

        let push = state.push || state.open_pr;
        if !push {
            info!("push disabled, leaving changes on the local branch");
            return Ok(());
        }
        self.host
            .push_branch(&cwd, &state.branch)
            .await
            .map_err(GraphError::Other)?;

        if state.open_pr {
            match &state.pr_url {
                Some(url) => info!(%url, "pull request already open"),
                None => {
                    let pr = self
                        .host
                        .create_pull_request(&cwd, &state.branch, &state.feature_name, &pr_body(state))
                        .await
                        .map_err(GraphError::Other)?;
                    info!(url = %pr.url, "opened pull request");
                    state.pr_url = Some(pr.url.clone());
                    state.pr_number = Some(pr.number);
                    let summary = PrSummary {
                        url: pr.url,
                        number: pr.number,
                        status: PrStatus::Open,
                        ci_status: Some(CiStatus::Pending),
                    };
                    if let Err(e) = self.reporter.pr_updated(&summary).await {
                        warn!(error = %e, "failed to record pull request");
                    }
                }
            }
        }

        let ci = CiLoop {
            host: self.host,
            fixer: self.fixer,
            reporter: self.reporter,
            limits: &self.config.ci,
            options: self.options.clone(),
        };
        ci.run(state).await?;
        Ok(())
    }
}
