use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shipyard::config::ShipyardConfig;
use shipyard::graph::ResumeSignal;

mod cmd;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(version, about = "Feature orchestrator: drives coding agents from spec to merged PR")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and drive features
    Feat {
        #[command(subcommand)]
        command: FeatCommands,
    },
    /// Manage the background status daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Execute one agent run (spawned by shipyard itself)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        run_id: String,

        /// continue, approved or rejected
        #[arg(long)]
        resume: Option<String>,

        /// Rejection feedback for `--resume rejected`
        #[arg(long)]
        feedback: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum FeatCommands {
    /// Create a feature and start its first run
    New {
        /// What to build
        description: String,

        /// Feature name (derived from the description when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Repository to work in (defaults to the current directory)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Feature that must reach implementation before this one starts
        #[arg(long)]
        parent: Option<String>,

        /// Continue past the PRD gate without approval
        #[arg(long)]
        allow_prd: bool,

        /// Continue past the plan gate without approval
        #[arg(long)]
        allow_plan: bool,

        /// Continue past the merge gate without approval
        #[arg(long)]
        allow_merge: bool,

        /// No approval gates at all
        #[arg(long, conflicts_with_all = ["allow_prd", "allow_plan", "allow_merge"])]
        autonomous: bool,

        /// Push the feature branch
        #[arg(long)]
        push: bool,

        /// Open a pull request (implies --push)
        #[arg(long)]
        pr: bool,

        /// Agent to use: claude-code or codex
        #[arg(long)]
        agent: Option<String>,
    },
    /// List features
    List,
    /// Show a feature, its current run and step log
    Show { id: String },
    /// Start a new run continuing a failed or interrupted one
    Retry { id: String },
    /// Resume an interrupted or waiting run
    Resume { id: String },
    /// Stop the running agent
    Stop { id: Option<String> },
    /// Approve the phase waiting for review
    Approve {
        id: Option<String>,

        /// YAML or JSON file answering open questions in spec.yaml
        #[arg(long)]
        answers: Option<PathBuf>,
    },
    /// Reject the phase waiting for review; it re-executes with the reason
    Reject {
        id: Option<String>,

        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground
    Start {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show whether the daemon is running
    Status,
    /// Ask the running daemon to shut down
    Stop,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", console::style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ShipyardConfig::load()?;

    match cli.command {
        Commands::Worker {
            run_id,
            resume,
            feedback,
        } => {
            config.ensure_dirs()?;
            let _guard = shipyard::logging::init_worker(&config.log_dir(), &run_id);
            let signal = parse_signal(resume.as_deref(), feedback)?;
            shipyard::worker::run(&config, &run_id, signal).await
        }
        Commands::Feat { command } => {
            init_cli(&config);
            run_feat(&config, command).await
        }
        Commands::Daemon { command } => {
            init_cli(&config);
            match command {
                DaemonCommands::Start { port } => cmd::cmd_daemon_start(&config, port).await,
                DaemonCommands::Status => cmd::cmd_daemon_status(&config),
                DaemonCommands::Stop => cmd::cmd_daemon_stop(&config),
            }
        }
    }
}

fn init_cli(config: &ShipyardConfig) {
    shipyard::logging::init_cli();
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
}

async fn run_feat(config: &ShipyardConfig, command: FeatCommands) -> Result<()> {
    match command {
        FeatCommands::New {
            description,
            name,
            repo,
            parent,
            allow_prd,
            allow_plan,
            allow_merge,
            autonomous,
            push,
            pr,
            agent,
        } => {
            let args = cmd::NewFeatureArgs {
                description,
                name,
                repo,
                parent,
                allow_prd,
                allow_plan,
                allow_merge,
                autonomous,
                push,
                pr,
                agent,
            };
            cmd::cmd_feat_new(config, args).await
        }
        FeatCommands::List => cmd::cmd_feat_list(config).await,
        FeatCommands::Show { id } => cmd::cmd_feat_show(config, &id).await,
        FeatCommands::Retry { id } => cmd::cmd_feat_retry(config, &id).await,
        FeatCommands::Resume { id } => cmd::cmd_feat_resume(config, &id).await,
        FeatCommands::Stop { id } => cmd::cmd_feat_stop(config, id.as_deref()).await,
        FeatCommands::Approve { id, answers } => {
            cmd::cmd_feat_approve(config, id.as_deref(), answers.as_deref()).await
        }
        FeatCommands::Reject { id, reason } => {
            cmd::cmd_feat_reject(config, id.as_deref(), reason).await
        }
    }
}

fn parse_signal(resume: Option<&str>, feedback: Option<String>) -> Result<Option<ResumeSignal>> {
    match resume {
        None | Some("continue") => Ok(None),
        Some("approved") => Ok(Some(ResumeSignal::Approved)),
        Some("rejected") => {
            let feedback = feedback.context("--resume rejected requires --feedback")?;
            Ok(Some(ResumeSignal::Rejected { feedback }))
        }
        Some(other) => anyhow::bail!("Unknown resume value: {}", other),
    }
}
