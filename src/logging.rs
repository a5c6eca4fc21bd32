use std::env;
use std::path::Path;

use anyhow::Context;
use once_cell::sync::OnceCell;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const LOG_ENV: &str = "VETCLINIC_LOG";
pub const LOG_FILE_NAME: &str = "vetclinic.log";
pub const DEFAULT_FILTER: &str = "vetclinic=info,sqlx=warn";

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Filter directives from `VETCLINIC_LOG`, then `RUST_LOG`, then the default.
pub fn filter_directives() -> String {
    env::var(LOG_ENV)
        .ok()
        .or_else(|| env::var("RUST_LOG").ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn env_filter() -> EnvFilter {
    let directives = filter_directives();
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn install(file: Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)>) -> Option<WorkerGuard> {
    let (writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let stderr = fmt::layer()
        .json()
        .with_timer(UtcTime::new(Rfc3339))
        .with_writer(std::io::stderr);
    let file_layer = writer.map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(UtcTime::new(Rfc3339))
            .with_writer(writer)
    });

    let subscriber = Registry::default()
        .with(env_filter())
        .with(stderr)
        .with(file_layer);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    // sqlx reports through `log`; forward those records into tracing.
    let _ = LogTracer::init();
    let _ = INSTALLED.set(());
    guard
}

/// Install the JSON stderr subscriber. Later calls are no-ops.
pub fn init_logging() {
    if INSTALLED.get().is_some() {
        return;
    }
    install(None);
}

/// Install the subscriber with an extra daily-rolling JSON file sink under `dir`.
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_file_logging(dir: &Path) -> anyhow::Result<Option<WorkerGuard>> {
    if INSTALLED.get().is_some() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok(install(Some((writer, guard))))
}

pub fn git_commit_hash() -> &'static str {
    option_env!("VETCLINIC_GIT_HASH").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn commit_hash_is_never_empty() {
        assert!(!git_commit_hash().is_empty());
    }
}
