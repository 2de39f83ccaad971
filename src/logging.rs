//! Tracing setup for processes that embed the engine.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host. `init_tracing` is a convenience for hosts and tests.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "engine.log";

/// Keeps the non-blocking file writer flushing; drop it at shutdown.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    /// Directory for the daily rolling file, `None` for stdout only.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    /// `ENABLE_FILE_LOGS` turns on the file layer, written under `LOG_DIR`
    /// (default `./logs`).
    pub fn from_env(filter: &str) -> Self {
        let enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| matches!(v.as_str(), "true" | "1"))
            .unwrap_or(false);
        let file_dir = enabled.then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });
        Self {
            filter: filter.to_string(),
            file_dir,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber from environment settings.
///
/// A second call in the same process leaves the first subscriber in place.
pub fn init_tracing(filter: &str) -> Option<FileLogGuard> {
    install(&LogSettings::from_env(filter))
}

pub fn install(settings: &LogSettings) -> Option<FileLogGuard> {
    let mut guard = None;
    let file_layer = settings.file_dir.as_ref().and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!("file logging disabled, cannot create {}: {err}", dir.display());
            return None;
        }
        let (writer, worker) =
            tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX));
        guard = Some(FileLogGuard { _guard: worker });
        Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
    });

    let installed = tracing_subscriber::registry()
        .with(settings.env_filter())
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        guard
    } else {
        None
    }
}
