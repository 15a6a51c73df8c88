//! Validate command

use std::process::ExitCode;

use clap::Args;

use capsched_scheduler::{Schedule, SchedulerConfig};

use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Validate this file instead of --config
    pub file: Option<std::path::PathBuf>,
}

pub fn run(args: ValidateArgs, global: &GlobalArgs) -> Result<ExitCode> {
    let path = args.file.unwrap_or_else(|| global.config.clone());
    let config = SchedulerConfig::load(&path)?;

    println!("Config:   {}", path.display());
    print!("{}", describe(&config)?);
    println!();
    println!("Configuration is valid");
    Ok(ExitCode::SUCCESS)
}

fn describe(config: &SchedulerConfig) -> Result<String> {
    let mut out = format!("Pool:     {}\n", config.pool_id()?);
    out.push_str(&format!("Timeout:  {}s per call\n", config.call_timeout_seconds));
    out.push_str(&format!("Events:   {}\n", if config.emit_events { "on" } else { "off" }));
    for schedule in Schedule::ALL {
        let profile = config.profile_for(schedule)?;
        out.push_str(&format!(
            "{:<9} {} at \"{}\" ({})\n",
            format!("{}:", schedule),
            profile.target,
            config.schedules.expression(schedule),
            config.schedules.time_zone(),
        ));
    }
    Ok(out)
}
