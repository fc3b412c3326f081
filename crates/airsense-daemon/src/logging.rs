//! Tracing setup for the daemon.
//!
//! The daemon is one event loop; everything worth logging is an event the
//! monitor or the transport emits, so there is no span plumbing here. Two
//! flavors:
//! - **production**: JSON lines into a daily-rotated file, plus a compact
//!   stdout stream for the journal
//! - **development**: pretty stdout only
//!
//! `AIRSENSE_LOG_LEVEL` sets the default filter; a `RUST_LOG` environment
//! variable overrides it entirely.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer flushing until the process exits.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the configured level filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let default_level = std::env::var("AIRSENSE_LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&default_level))?;

    if is_production {
        let dir = log_directory();
        std::fs::create_dir_all(&dir).ok();
        let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(&dir, "airsense"));
        let _ = FILE_GUARD.set(guard);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_writer)
                    .with_target(true),
            )
            // Stdout goes to journald, which timestamps and colors itself.
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }

    Ok(())
}

/// Log directory for production file output.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/airsense")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "airsense")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
