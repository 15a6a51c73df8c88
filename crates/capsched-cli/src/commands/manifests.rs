//! Manifests command: render the CronJobs that fire the schedules

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use capsched_scheduler::{generate_trigger_manifests, SchedulerConfig, TriggerOptions};

use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct ManifestsArgs {
    /// Container image holding the capsched binary
    #[arg(long, env = "CAPSCHED_IMAGE")]
    pub image: String,

    /// Base name for the generated objects
    #[arg(long, default_value = "capsched")]
    pub name: String,

    /// Namespace the CronJobs run in
    #[arg(long, default_value = "capsched-system")]
    pub namespace: String,

    /// Write to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub fn run(args: ManifestsArgs, global: &GlobalArgs) -> Result<ExitCode> {
    let (config, config_yaml) = SchedulerConfig::load_with_source(&global.config)?;

    let opts = TriggerOptions {
        name: args.name,
        namespace: args.namespace,
        image: args.image,
        config_yaml,
    };
    let manifests = generate_trigger_manifests(&config, &opts)?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, manifests)?;
            eprintln!("Wrote trigger manifests to {}", path.display());
        }
        None => print!("{}", manifests),
    }
    Ok(ExitCode::SUCCESS)
}
