//! capsched CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;

use capsched_common::kube_utils::create_client_with_timeout;
use capsched_scheduler::SchedulerConfig;

/// Default location of the configuration file inside the job pod
pub const DEFAULT_CONFIG_PATH: &str = "/etc/capsched/config.yaml";

/// capsched - scheduled capacity for Cluster API worker pools
#[derive(Parser, Debug)]
#[command(name = "capsched")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Scheduler configuration file
    #[arg(long, global = true, env = "CAPSCHED_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Kubeconfig to use instead of in-cluster or default config
    #[arg(long, global = true, env = "CAPSCHED_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format (logs always go to stderr)
    #[arg(long, global = true, env = "CAPSCHED_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log line format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable text
    Plain,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the pool toward the profile of the schedule that fired
    Run(commands::run::RunArgs),
    /// Show the pool's current capacity and status
    Status(commands::status::StatusArgs),
    /// Render the CronJobs and RBAC that fire the schedules
    Manifests(commands::manifests::ManifestsArgs),
    /// Load and validate a configuration file
    Validate(commands::validate::ValidateArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<ExitCode> {
        let global = GlobalArgs {
            config: self.config,
            kubeconfig: self.kubeconfig,
        };
        match self.command {
            Commands::Run(args) => commands::run::run(args, &global).await,
            Commands::Status(args) => commands::status::run(args, &global).await,
            Commands::Manifests(args) => commands::manifests::run(args, &global),
            Commands::Validate(args) => commands::validate::run(args, &global),
        }
    }
}

/// Arguments shared by every subcommand
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    /// Scheduler configuration file
    pub config: PathBuf,
    /// Explicit kubeconfig
    pub kubeconfig: Option<PathBuf>,
}

impl GlobalArgs {
    /// Load and validate the configuration file
    pub fn load_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig::load(&self.config)?)
    }

    /// Build a kube client whose connect and read timeouts match the call timeout
    pub async fn client(&self, config: &SchedulerConfig) -> Result<Client> {
        let timeout = config.call_timeout();
        Ok(create_client_with_timeout(self.kubeconfig.as_deref(), timeout, timeout).await?)
    }
}
