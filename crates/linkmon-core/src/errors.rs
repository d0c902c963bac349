use std::path::PathBuf;

/// Core error type for the link monitor.
///
/// Adapter crates map their specific errors into this type so startup code can
/// tell fatal failures (config, store) from per-event ones (insert, channel).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("malformed config file {path}: {reason}")]
    ConfigFormat { path: PathBuf, reason: String },

    #[error("link store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("link store is closed")]
    Closed,

    #[error("channel {identifier} unreachable: {reason}")]
    ChannelUnreachable { identifier: String, reason: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn config_format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ConfigFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that must abort startup rather than be logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::ConfigFormat { .. } | Self::StoreUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
