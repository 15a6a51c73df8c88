//! capsched
//!
//! One invocation of a capacity schedule, plus the operator commands around it.

use std::process::ExitCode;

use clap::Parser;

use capsched_cli::{Cli, LogFormat};
use capsched_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = TelemetryConfig {
        json_logs: cli.log_format == LogFormat::Json,
        ..Default::default()
    };
    let guard = match init_telemetry(telemetry) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(capsched_scheduler::EXIT_PERMANENT_FAILURE as u8);
        }
    };

    let code = match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "capsched failed");
            ExitCode::from(e.exit_code() as u8)
        }
    };

    guard.shutdown();
    code
}
