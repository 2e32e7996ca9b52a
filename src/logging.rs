//! Logging setup for stowage.
//!
//! One `EnvFilter` governs everything: the configured level is the default,
//! `RUST_LOG` can widen or narrow it, and the configured directives are
//! applied last. Output always goes to stdout; a log file is optional and
//! opened in append mode.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{Result, StowageError};

/// Parse log level string to tracing Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn parse_directives(directives: &[String]) -> Result<Vec<Directive>> {
    directives
        .iter()
        .map(|raw| {
            raw.parse::<Directive>().map_err(|e| {
                StowageError::Config(format!("invalid logging directive {raw:?}: {e}"))
            })
        })
        .collect()
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = parse_directives(&config.directives)?;
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(&config.level).into())
        .from_env_lossy();
    Ok(directives
        .into_iter()
        .fold(filter, |filter, directive| filter.add_directive(directive)))
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Initialize logging to stdout and, when configured, a log file.
///
/// Fails on a malformed directive, an unwritable log file, or when a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let file_layer = match config.file.as_deref().filter(|f| !f.trim().is_empty()) {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(open_log_file(Path::new(path))?))
                .with_ansi(false)
                .with_target(true),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| StowageError::Config(format!("logging already initialized: {e}")))
}

/// Initialize console-only logging (development and fallback).
pub fn init_console_only(level: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
