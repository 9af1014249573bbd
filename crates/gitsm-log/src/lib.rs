// ABOUTME: Shared logging setup for gitsm
// ABOUTME: Two functions: init() for stderr, init_file() for an append-only log file

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Pick the default level: WARN keeps command output clean, DEBUG shows every
/// subprocess invocation.
fn default_level(verbose: bool) -> tracing::Level {
    if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    }
}

/// Standard logging to stderr. Default: WARN level (DEBUG when verbose), RUST_LOG override.
pub fn init(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level(verbose).into()))
        .with_target(false)
        .init();
}

/// File-based logging. Default: INFO level (DEBUG when verbose), RUST_LOG override.
/// If the file cannot be opened, prints a warning and logs to stderr instead.
/// Does nothing when a global subscriber is already installed.
pub fn init_file(path: &Path, verbose: bool) {
    let log_file = match open_log_file(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "Warning: failed to set up file logging at {}: {e}",
                path.display()
            );
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::from_default_env().add_directive(default_level(verbose).into()),
                )
                .with_target(false)
                .try_init();
            return;
        }
    };

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let _ = tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_ansi(false)
        .try_init();
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
