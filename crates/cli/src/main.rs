//! Cluster Cost Optimizer CLI
//!
//! A command-line tool for reviewing held decisions, inspecting actions,
//! tuning the decision policy and triggering optimization runs.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{actions, decisions, policy, runs};

/// Cluster Cost Optimizer CLI
#[derive(Parser)]
#[command(name = "coa")]
#[command(author, version, about = "CLI for the Cluster Cost Optimizer", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via COA_API_URL env var or the config file)
    #[arg(long, env = "COA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect decisions
    #[command(subcommand)]
    Decisions(DecisionCommands),

    /// Approve a held decision for execution
    Approve {
        /// Candidate ID of the held decision
        id: String,

        /// Reviewer name (defaults to the config file, then cli-user)
        #[arg(long)]
        reviewer: Option<String>,

        /// Reason for approval
        #[arg(long)]
        reason: Option<String>,
    },

    /// Reject a held decision
    Reject {
        /// Candidate ID of the held decision
        id: String,

        /// Reviewer name (defaults to the config file, then cli-user)
        #[arg(long)]
        reviewer: Option<String>,

        /// Reason for rejection
        #[arg(long)]
        reason: Option<String>,
    },

    /// Inspect executed actions
    #[command(subcommand)]
    Actions(ActionCommands),

    /// View or change the decision policy
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Inspect or trigger optimization runs
    #[command(subcommand)]
    Runs(RunCommands),

    /// Show agent component health
    Status,
}

#[derive(Subcommand)]
pub enum DecisionCommands {
    /// Decisions held for human approval
    Pending,

    /// Decision audit trail, newest first
    List {
        /// Maximum number of decisions
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum ActionCommands {
    /// List action records
    List {
        /// Filter by state (pending, executing, applied, failed, abandoned, rolled_back)
        #[arg(long)]
        state: Option<String>,
    },

    /// Show one action record with its history
    Get {
        /// Action ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Show the live policy
    Show,

    /// Change policy fields; unset options keep their value
    Set {
        /// Auto-approve only above this confidence
        #[arg(long)]
        confidence_floor: Option<f64>,

        /// Reject outright below this confidence
        #[arg(long)]
        reject_floor: Option<f64>,

        /// Auto-apply low risk actions
        #[arg(long)]
        auto_apply_low: Option<bool>,

        /// Auto-apply medium risk actions
        #[arg(long)]
        auto_apply_medium: Option<bool>,

        /// Auto-apply high risk actions
        #[arg(long)]
        auto_apply_high: Option<bool>,

        /// Seconds between runs
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum RunCommands {
    /// Report of the last finished run
    Last,

    /// Start a run now
    Trigger,
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;
    let format = cli.format;

    match cli.command {
        Commands::Decisions(cmd) => match cmd {
            DecisionCommands::Pending => decisions::list_pending(&client, format).await?,
            DecisionCommands::List { limit } => {
                decisions::list_decisions(&client, limit, format).await?
            }
        },
        Commands::Approve { id, reviewer, reason } => {
            let reviewer = config.resolve_reviewer(reviewer);
            decisions::approve(&client, &id, reviewer, reason, format).await?;
        }
        Commands::Reject { id, reviewer, reason } => {
            let reviewer = config.resolve_reviewer(reviewer);
            decisions::reject(&client, &id, reviewer, reason, format).await?;
        }
        Commands::Actions(cmd) => match cmd {
            ActionCommands::List { state } => actions::list_actions(&client, state, format).await?,
            ActionCommands::Get { id } => actions::get_action(&client, &id, format).await?,
        },
        Commands::Policy(cmd) => match cmd {
            PolicyCommands::Show => policy::show_policy(&client, format).await?,
            PolicyCommands::Set {
                confidence_floor,
                reject_floor,
                auto_apply_low,
                auto_apply_medium,
                auto_apply_high,
                interval,
            } => {
                let update = client::PolicyUpdate {
                    confidence_floor,
                    reject_floor,
                    auto_apply_low,
                    auto_apply_medium,
                    auto_apply_high,
                    sampling_interval_secs: interval,
                };
                policy::set_policy(&client, update, format).await?;
            }
        },
        Commands::Runs(cmd) => match cmd {
            RunCommands::Last => runs::show_last_run(&client, format).await?,
            RunCommands::Trigger => runs::trigger_run(&client, format).await?,
        },
        Commands::Status => runs::show_status(&client, format).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
