//! Status command: read-only view of the pool against both profiles

use std::process::ExitCode;

use clap::Args;
use serde_json::json;

use capsched_capi::{MachineDeploymentClient, PoolClient, PoolState};
use capsched_scheduler::{Schedule, SchedulerConfig};

use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StatusArgs, global: &GlobalArgs) -> Result<ExitCode> {
    let config = global.load_config()?;
    let pool = config.pool_id()?;
    let client = MachineDeploymentClient::new(global.client(&config).await?);

    let state = tokio::time::timeout(config.call_timeout(), client.get_pool_state(&pool))
        .await
        .map_err(|_| {
            capsched_common::Error::transient(pool.to_string(), "get", "timed out reading pool")
        })??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status_json(&config, &state))?);
    } else {
        print!("{}", render(&config, &state));
    }
    Ok(ExitCode::SUCCESS)
}

fn status_json(config: &SchedulerConfig, state: &PoolState) -> serde_json::Value {
    json!({
        "state": state,
        "matchesUp": state.matches(&config.profiles.up),
        "matchesDown": state.matches(&config.profiles.down),
    })
}

fn render(config: &SchedulerConfig, state: &PoolState) -> String {
    let bound = |b: Option<u32>| b.map_or_else(|| "-".to_string(), |v| v.to_string());
    let mut out = String::new();
    out.push_str(&format!("Pool:     {}\n", state.pool));
    out.push_str(&format!("Status:   {}\n", state.status));
    out.push_str(&format!("Min:      {}\n", bound(state.current_min)));
    out.push_str(&format!("Max:      {}\n", bound(state.current_max)));
    out.push_str(&format!("Desired:  {}\n", state.current_desired));
    for schedule in Schedule::ALL {
        let target = match schedule {
            Schedule::Up => &config.profiles.up,
            Schedule::Down => &config.profiles.down,
        };
        let marker = if state.matches(target) { "matches" } else { "differs" };
        out.push_str(&format!(
            "{:<9} {} ({}, {} {})\n",
            format!("{}:", capitalize(schedule.as_str())),
            target,
            marker,
            config.schedules.expression(schedule),
            config.schedules.time_zone(),
        ));
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
