//! Feature commands: `shipyard feat ...`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use shipyard::config::ShipyardConfig;
use shipyard::executor::AgentKind;
use shipyard::gates::gate_group;
use shipyard::graph::GraphState;
use shipyard::lifecycle::{RunLifecycle, StartRequest};
use shipyard::process::OsProcessControl;
use shipyard::spec_dir::parse_answers;
use shipyard::steps::{StepNode, build_tree, format_duration};
use shipyard::store::{DbHandle, ShipyardDb};
use shipyard::util::short_id;
use shipyard_common::{AgentRun, AgentRunStatus, ApprovalGates, Feature, StepStatus};

/// Flags for `feat new`.
pub struct NewFeatureArgs {
    pub description: String,
    pub name: Option<String>,
    pub repo: Option<PathBuf>,
    pub parent: Option<String>,
    pub allow_prd: bool,
    pub allow_plan: bool,
    pub allow_merge: bool,
    pub autonomous: bool,
    pub push: bool,
    pub pr: bool,
    pub agent: Option<String>,
}

struct Session {
    db: DbHandle,
    lifecycle: RunLifecycle,
}

fn open(config: &ShipyardConfig) -> Result<Session> {
    config.ensure_dirs()?;
    let db = DbHandle::new(ShipyardDb::new(&config.db_path()).context("Failed to open database")?);
    let process = Arc::new(OsProcessControl::new(config.home.clone(), config.log_dir()));
    let lifecycle = RunLifecycle::new(db.clone(), process, config.specs_dir());
    Ok(Session { db, lifecycle })
}

pub async fn cmd_feat_new(config: &ShipyardConfig, args: NewFeatureArgs) -> Result<()> {
    let ctx = open(config)?;
    let repository_path = match args.repo {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let repository_path = repository_path
        .canonicalize()
        .with_context(|| format!("Repository {} does not exist", repository_path.display()))?;
    let agent_kind = match args.agent {
        Some(kind) => kind.parse::<AgentKind>().map_err(anyhow::Error::msg)?,
        None => config.toml.agent.kind,
    };
    let approval_gates = (!args.autonomous).then_some(ApprovalGates {
        allow_prd: args.allow_prd,
        allow_plan: args.allow_plan,
        allow_merge: args.allow_merge,
    });

    let started = ctx
        .lifecycle
        .start_feature(StartRequest {
            name: args.name,
            description: args.description,
            repository_path,
            parent: args.parent,
            approval_gates,
            push: args.push || config.toml.workflow.push,
            open_pr: args.pr || config.toml.workflow.open_pr,
            agent_kind,
        })
        .await?;

    let feature = &started.feature;
    println!(
        "{} {} ({})",
        style("Created feature").green().bold(),
        style(&feature.name).bold(),
        short_id(&feature.id)
    );
    println!("  Branch:  {}", feature.branch);
    if let Some(spec_path) = &feature.spec_path {
        println!("  Spec:    {}", spec_path);
    }
    println!("  Gates:   {}", describe_gates(started.run.approval_gates.as_ref()));
    if started.spawned {
        println!(
            "  Run:     {} started",
            short_id(&started.run.id)
        );
    } else {
        println!(
            "  Run:     {} {}",
            short_id(&started.run.id),
            style("blocked until the parent feature reaches implementation").yellow()
        );
    }
    Ok(())
}

pub async fn cmd_feat_list(config: &ShipyardConfig) -> Result<()> {
    let ctx = open(config)?;
    let rows = ctx
        .db
        .call(|db| {
            let mut rows = Vec::new();
            for feature in db.list_features()? {
                let run = match &feature.agent_run_id {
                    Some(id) => db.get_run(id)?,
                    None => None,
                };
                rows.push((feature, run));
            }
            Ok(rows)
        })
        .await?;

    if rows.is_empty() {
        println!("No features yet. Create one with 'shipyard feat new <description>'.");
        return Ok(());
    }

    println!(
        "{:<10} {:<32} {:<16} {:<18} PR",
        "ID", "Name", "Lifecycle", "Run"
    );
    println!(
        "{:<10} {:<32} {:<16} {:<18} --",
        "--------", "----", "---------", "---"
    );
    for (feature, run) in rows {
        let status = run
            .as_ref()
            .map(|r| r.status.to_string())
            .unwrap_or_else(|| "-".to_string());
        let pr = feature
            .pr
            .as_ref()
            .map(|pr| format!("#{}", pr.number))
            .unwrap_or_default();
        println!(
            "{:<10} {:<32} {:<16} {} {}",
            short_id(&feature.id),
            truncate(&feature.name, 32),
            feature.lifecycle.to_string(),
            status_style(run.as_ref().map(|r| r.status), &format!("{:<18}", status)),
            pr
        );
    }
    Ok(())
}

pub async fn cmd_feat_show(config: &ShipyardConfig, id: &str) -> Result<()> {
    let ctx = open(config)?;
    let feature = ctx.lifecycle.find_feature(id).await?;
    println!();
    println!("{}", style(&feature.name).bold().cyan());
    println!("  ID:          {}", feature.id);
    println!("  Lifecycle:   {}", feature.lifecycle);
    println!("  Repository:  {}", feature.repository_path);
    println!("  Branch:      {}", feature.branch);
    if let Some(parent) = &feature.parent_id {
        println!("  Parent:      {}", short_id(parent));
    }
    if let Some(spec_path) = &feature.spec_path {
        println!("  Spec:        {}", spec_path);
    }
    if let Some(pr) = &feature.pr {
        let ci = pr.ci_status.map(|c| c.as_str()).unwrap_or("unknown");
        println!("  PR:          {} (CI {})", pr.url, ci);
    }

    let Some(run_id) = feature.agent_run_id.clone() else {
        println!();
        return Ok(());
    };
    let (_, run) = ctx.lifecycle.current_run(&feature.id).await?;
    println!();
    println!("{}", style("Current run").bold());
    println!("  ID:          {}", run.id);
    println!("  Status:      {}", status_style(Some(run.status), run.status.as_str()));
    println!("  Agent:       {}", run.agent_kind);
    println!("  Gates:       {}", describe_gates(run.approval_gates.as_ref()));
    if let Some(error) = &run.error {
        println!("  Error:       {}", style(error).red());
    }
    if run.status == AgentRunStatus::WaitingApproval
        && let Some(phase) = ctx.lifecycle.waiting_phase(&run).await?
    {
        let gate = gate_group(phase).map(|g| g.label()).unwrap_or("final");
        println!(
            "  Waiting:     {} after {} ({} gate)",
            style("approval").yellow().bold(),
            phase,
            gate
        );
        println!(
            "               run 'shipyard feat approve {}' or 'shipyard feat reject {}'",
            feature.slug, feature.slug
        );
    }

    let thread_id = run.thread_id.clone();
    let checkpoint = ctx.db.call(move |db| db.get_checkpoint(&thread_id)).await?;
    if let Some(raw) = checkpoint
        && let Ok(state) = serde_json::from_str::<GraphState>(&raw)
    {
        print_progress(&state);
    }

    let steps = ctx.db.call(move |db| db.list_steps(&run_id)).await?;
    if !steps.is_empty() {
        println!();
        println!("{}", style("Steps").bold());
        for node in build_tree(steps) {
            print_step(&node, 1);
        }
    }
    println!();
    Ok(())
}

fn print_progress(state: &GraphState) {
    if !state.completed_phases.is_empty() {
        let done: Vec<&str> = state.completed_phases.iter().map(|p| p.as_str()).collect();
        println!("  Completed:   {}", done.join(", "));
    }
    if state.ci_fix_history.is_empty() {
        return;
    }
    println!();
    println!("{}", style("CI fix attempts").bold());
    for record in &state.ci_fix_history {
        println!(
            "  #{} {} at {}",
            record.attempt, record.outcome, record.started_at
        );
    }
}

fn print_step(node: &StepNode, depth: usize) {
    let marker = match node.step.status {
        StepStatus::Completed => style("✓").green(),
        StepStatus::Failed => style("✗").red(),
        StepStatus::Running => style("…").yellow(),
    };
    let duration = node
        .duration_ms
        .map(format_duration)
        .unwrap_or_else(|| "running".to_string());
    let detail = node
        .step
        .detail
        .as_deref()
        .map(|d| format!(" {}", style(truncate(d, 80)).dim()))
        .unwrap_or_default();
    println!(
        "{}{} {} ({}){}",
        "  ".repeat(depth),
        marker,
        node.step.name,
        duration,
        detail
    );
    for child in &node.children {
        print_step(child, depth + 1);
    }
}

pub async fn cmd_feat_retry(config: &ShipyardConfig, id: &str) -> Result<()> {
    let ctx = open(config)?;
    let run = ctx.lifecycle.retry(id).await?;
    print_continued("Retrying", &run);
    Ok(())
}

pub async fn cmd_feat_resume(config: &ShipyardConfig, id: &str) -> Result<()> {
    let ctx = open(config)?;
    let run = ctx.lifecycle.resume(id).await?;
    print_continued("Resuming", &run);
    Ok(())
}

fn print_continued(verb: &str, run: &AgentRun) {
    println!(
        "{} on thread {} with run {}",
        style(verb).green().bold(),
        short_id(&run.thread_id),
        short_id(&run.id)
    );
}

pub async fn cmd_feat_stop(config: &ShipyardConfig, id: Option<&str>) -> Result<()> {
    let ctx = open(config)?;
    let feature = resolve(
        &ctx,
        id,
        &[
            AgentRunStatus::Running,
            AgentRunStatus::Pending,
            AgentRunStatus::WaitingApproval,
        ],
        "running",
    )
    .await?;
    let run = ctx.lifecycle.stop(&feature.id).await?;
    println!(
        "{} {} (run {} is {})",
        style("Stopped").yellow().bold(),
        feature.name,
        short_id(&run.id),
        run.status
    );
    Ok(())
}

pub async fn cmd_feat_approve(
    config: &ShipyardConfig,
    id: Option<&str>,
    answers: Option<&Path>,
) -> Result<()> {
    let ctx = open(config)?;
    let feature = resolve(&ctx, id, &[AgentRunStatus::WaitingApproval], "waiting").await?;
    let answers = match answers {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read answers file {}", path.display()))?;
            parse_answers(&content)?
        }
        None => Vec::new(),
    };
    let run = ctx.lifecycle.approve(&feature.id, &answers).await?;
    println!(
        "{} {} (run {} continues)",
        style("Approved").green().bold(),
        feature.name,
        short_id(&run.id)
    );
    if !answers.is_empty() {
        println!("  Recorded {} answer(s) in spec.yaml", answers.len());
    }
    Ok(())
}

pub async fn cmd_feat_reject(
    config: &ShipyardConfig,
    id: Option<&str>,
    reason: Option<String>,
) -> Result<()> {
    let ctx = open(config)?;
    let feature = resolve(&ctx, id, &[AgentRunStatus::WaitingApproval], "waiting").await?;
    let reason = match reason {
        Some(reason) => reason,
        None if console::Term::stdout().is_term() => dialoguer::Input::<String>::new()
            .with_prompt("What should change?")
            .interact_text()
            .context("Failed to read rejection reason")?,
        None => bail!("A rejection reason is required (--reason)"),
    };
    if reason.trim().is_empty() {
        bail!("A rejection reason is required (--reason)");
    }
    let run = ctx.lifecycle.reject(&feature.id, reason.trim()).await?;
    println!(
        "{} {} (run {} re-executes the phase)",
        style("Rejected").red().bold(),
        feature.name,
        short_id(&run.id)
    );
    Ok(())
}

/// The feature named by `id`, or the most recently updated one whose run
/// is in `statuses`.
async fn resolve(
    ctx: &Session,
    id: Option<&str>,
    statuses: &[AgentRunStatus],
    what: &str,
) -> Result<Feature> {
    if let Some(id) = id {
        return Ok(ctx.lifecycle.find_feature(id).await?);
    }
    match ctx.lifecycle.latest_feature_with(statuses).await? {
        Some(feature) => Ok(feature),
        None => bail!("No {} feature found; pass a feature id", what),
    }
}

fn describe_gates(gates: Option<&ApprovalGates>) -> String {
    let Some(gates) = gates else {
        return "autonomous".to_string();
    };
    let mut allowed = Vec::new();
    if gates.allow_prd {
        allowed.push("PRD");
    }
    if gates.allow_plan {
        allowed.push("plan");
    }
    if gates.allow_merge {
        allowed.push("merge");
    }
    if allowed.is_empty() {
        "approval required at every gate".to_string()
    } else {
        format!("auto-approve {}", allowed.join(", "))
    }
}

fn status_style(status: Option<AgentRunStatus>, text: &str) -> String {
    let styled = match status {
        Some(AgentRunStatus::Completed) => style(text).green(),
        Some(AgentRunStatus::Failed) => style(text).red(),
        Some(AgentRunStatus::WaitingApproval) => style(text).yellow(),
        Some(AgentRunStatus::Running) | Some(AgentRunStatus::Pending) => style(text).cyan(),
        _ => style(text).dim(),
    };
    styled.to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
