//! Startup helpers for the binary:
//! - tracing subscriber (stderr, so stdout only carries the run report)
//! - adapter construction from `Config`

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::services::google_calendar::GoogleCalendarService;
use crate::services::silae::SilaeService;
use crate::services::sync::WeeklySyncManager;

pub type ProductionSyncManager = WeeklySyncManager<SilaeService, GoogleCalendarService>;

/// `RUST_LOG` wins; otherwise this crate logs at `level` and dependencies at `warn`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warn,shift_calendar_sync={}", level).into())
}

pub fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wire the Silae portal and the Google calendar into a sync manager.
pub fn build_sync_manager(config: &Config) -> Result<ProductionSyncManager> {
    let source = SilaeService::new(&config.silae)?;
    let store = GoogleCalendarService::new(&config.google)?;

    tracing::info!(
        "Syncing shifts of employee {} into calendar {} ({})",
        config.silae.employee_id,
        config.google.calendar_id,
        config.sync.timezone.name()
    );

    Ok(WeeklySyncManager::new(source, store, config.sync.clone()))
}
