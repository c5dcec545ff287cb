use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use warden::exit_codes;
use warden::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about = "Drive coding agents through policy-gated retry cycles")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Diagnostic log format on stderr
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .warden/ layout with default config, policy and queue
    Init,
    /// Process pending tasks from the queue
    Run(RunArgs),
    /// Show the queue, or the checkpoint history of one task
    Status {
        /// Task id
        task: Option<String>,
    },
    /// Inspect the verification policy
    Policy {
        #[command(subcommand)]
        command: Option<PolicyCommands>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Queue file (defaults to .warden/queue.json)
    #[arg(short, long)]
    pub queue: Option<PathBuf>,

    /// Process at most N tasks
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Cap on iterations per task and per role
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Report routing decisions without executing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Kill-switch file to poll (defaults to .warden/run_mode)
    #[arg(long)]
    pub kill_switch: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
pub enum PolicyCommands {
    /// Show the active policy and its version id
    Show,
    /// Validate the policy and show any warnings
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("error: failed to get current directory: {}", e);
                std::process::exit(exit_codes::FAILURE);
            }
        },
    };

    let log_dir = warden::init::get_warden_dir(&project_dir).join("logs");
    let log_dir = warden::init::is_initialized(&project_dir).then_some(log_dir.as_path());
    let guard = match logging::init(cli.log_format, cli.verbose, log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to initialize logging: {:#}", e);
            std::process::exit(exit_codes::FAILURE);
        }
    };

    let result = dispatch(&cli, &project_dir).await;
    drop(guard);

    if let Err(err) = result {
        eprintln!("{} {:#}", console::style("error:").red().bold(), err);
        std::process::exit(exit_codes::for_error(&err));
    }
}

async fn dispatch(cli: &Cli, project_dir: &Path) -> Result<()> {
    match &cli.command {
        Commands::Init => cmd::cmd_init(project_dir)?,
        Commands::Run(args) => cmd::cmd_run(cli, project_dir, args).await?,
        Commands::Status { task } => cmd::cmd_status(project_dir, task.as_deref())?,
        Commands::Policy { command } => cmd::cmd_policy(project_dir, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(project_dir, command.clone())
            .context("Configuration check failed")?,
    }
    Ok(())
}
