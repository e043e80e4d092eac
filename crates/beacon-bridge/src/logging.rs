//! Logging initialization.
//!
//! Output depends on [`RunEnvironment`]:
//! - **Production**: JSON lines to a rolling file under [`LoggingConfig::directory`]
//!   plus compact stdout for the systemd journal
//! - **Development**: pretty stdout with span events
//!
//! The filter comes from `RUST_LOG` when set, otherwise from `logging.level`.

use std::sync::OnceLock;

use anyhow::Context;
use beacon_core::config::{LogRotation, LoggingConfig, RunEnvironment};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file name prefix; the appender adds the date suffix.
const FILE_PREFIX: &str = "beacon-bridge";

/// Keeps the non-blocking writers flushing for the lifetime of the process.
static GUARDS: OnceLock<(WorkerGuard, WorkerGuard)> = OnceLock::new();

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive does not parse or, in production,
/// the log directory cannot be created.
pub fn init(env: RunEnvironment, logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(std::env::var("RUST_LOG").ok().as_deref(), &logging.level)?;

    if env.is_production() {
        init_production(filter, logging)
    } else {
        init_development(filter);
        Ok(())
    }
}

/// `RUST_LOG` wins over the configured level when it is set and non-empty.
fn env_filter(rust_log: Option<&str>, level: &str) -> anyhow::Result<EnvFilter> {
    let directive = rust_log.filter(|d| !d.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(directive).with_context(|| format!("Invalid log filter '{directive}'"))
}

const fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn init_production(filter: EnvFilter, logging: &LoggingConfig) -> anyhow::Result<()> {
    let dir = logging.directory();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = RollingFileAppender::new(rotation(logging.rotation), &dir, FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps and does not render ANSI.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .without_time()
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = GUARDS.set((file_guard, stdout_guard));
    Ok(())
}

fn init_development(filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();
}
