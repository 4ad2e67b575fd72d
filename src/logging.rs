//! Logging initialization: console plus a rolling file in the data
//! directory.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, UserPaths};

/// Initialize tracing. Returns the file appender guard, which must stay
/// alive for the lifetime of the process or buffered log lines are lost.
pub fn init(config: &Config, paths: &UserPaths) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("claude_station={}", config.logging.level)));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr));

    if config.logging.file {
        let appender = tracing_appender::rolling::never(paths.log_dir(), "claude_station.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        registry
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .init();
        Ok(Some(guard))
    } else {
        registry.init();
        Ok(None)
    }
}
