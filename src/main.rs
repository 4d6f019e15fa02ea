use std::process::ExitCode;

mod config;
mod error;
mod models;
mod services;

use config::Config;
use services::init;

const EXIT_FAILED: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load configuration
    let config = Config::from_env()?;

    init::init_tracing(&config.log.level);
    tracing::info!("Starting weekly shift calendar sync");

    let manager = init::build_sync_manager(&config)?;

    let outcome = tokio::select! {
        result = manager.run(chrono::Utc::now()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(
                "Interrupted; calendar operations already sent are not rolled back, the next run reconciles them"
            );
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    match outcome {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.summary.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                let failed: Vec<String> = report
                    .summary
                    .failed_keys()
                    .iter()
                    .map(|key| key.to_string())
                    .collect();
                tracing::warn!(
                    "Sync finished with {} failed operations ({}); rerun to retry them",
                    report.summary.errors.len(),
                    failed.join(", ")
                );
                Ok(ExitCode::from(EXIT_FAILED))
            }
        }
        Err(e) => {
            let kind = if e.is_fatal() { "aborted" } else { "failed" };
            tracing::error!("Sync {}: {}", kind, e);
            println!(
                "{}",
                serde_json::json!({
                    "error": {
                        "code": e.code(),
                        "message": e.to_string(),
                    }
                })
            );
            Ok(ExitCode::from(EXIT_FAILED))
        }
    }
}
