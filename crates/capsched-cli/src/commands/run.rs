//! Run command: one invocation of a schedule

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use tracing::info;

use capsched_capi::MachineDeploymentClient;
use capsched_common::events::KubeEventPublisher;
use capsched_common::FIELD_MANAGER;
use capsched_scheduler::{
    CapacityScheduler, EventSink, FanOutSink, Outcome, ReconciliationResult, ResultSink,
    Schedule, TracingSink, EXIT_PERMANENT_FAILURE,
};

use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Which schedule fired (up or down)
    #[arg(long, env = "CAPSCHED_SCHEDULE")]
    pub schedule: Schedule,
}

/// Writes each result as one JSON line on stdout
pub struct StdoutSink;

#[async_trait]
impl ResultSink for StdoutSink {
    async fn emit(&self, result: &ReconciliationResult) -> capsched_common::Result<()> {
        let line = serde_json::to_string(result).map_err(|e| {
            capsched_common::Error::serialization_for_kind("ReconciliationResult", e.to_string())
        })?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)
            .and_then(|_| stdout.flush())
            .map_err(|e| capsched_common::Error::internal_with_context("stdout", e.to_string()))
    }
}

/// Exit code for a reconciliation that returned a result
pub fn exit_code_for(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Failed => ExitCode::from(EXIT_PERMANENT_FAILURE as u8),
        _ => ExitCode::SUCCESS,
    }
}

pub async fn run(args: RunArgs, global: &GlobalArgs) -> Result<ExitCode> {
    let config = global.load_config()?;
    let profile = config.profile_for(args.schedule)?;
    let client = global.client(&config).await?;

    let mut sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(StdoutSink), Arc::new(TracingSink)];
    if config.emit_events {
        let instance = std::env::var("POD_NAME").ok();
        let publisher = KubeEventPublisher::new(client.clone(), FIELD_MANAGER, instance);
        sinks.push(Arc::new(EventSink::new(Arc::new(publisher))));
    }

    let scheduler = CapacityScheduler::new(
        Arc::new(MachineDeploymentClient::new(client)),
        Arc::new(FanOutSink::new(sinks)),
        config.call_timeout(),
    );

    info!(profile = %profile, "Running capacity schedule");
    let result = scheduler.reconcile(&profile).await?;
    Ok(exit_code_for(result.outcome))
}
