use std::{fs, fs::OpenOptions, path::Path, sync::Mutex};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize process-wide structured logging.
///
/// Every module logs under its own target, so `RUST_LOG=linkmon_core::store=debug`
/// narrows output to one component. Without `RUST_LOG`, our crates log at `level`
/// and everything else at `warn`. When `log_file` is set, records are also
/// appended to it (no ANSI colours).
pub fn init(service_name: &str, level: &str, log_file: Option<&Path>) -> Result<()> {
    let level = normalize_level(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,linkmon_core={level},linkmon_telegram={level},{service_name}={level}"
        ))
    });

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::External(format!("logging already initialized: {e}")))?;

    Ok(())
}

/// Map a user-supplied level name onto a filter directive; unknown names fall back to `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}
