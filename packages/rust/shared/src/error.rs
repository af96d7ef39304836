//! Error types for stackwatch.
//!
//! Library crates use [`StackwatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all stackwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum StackwatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A feed could not be fetched (network, timeout, or HTTP error).
    /// The affected feed contributes nothing to the cycle; the cycle continues.
    #[error("feed unavailable ({source_name}): {message}")]
    Feed {
        source_name: String,
        message: String,
    },

    /// A raw feed payload could not be normalized into an advisory item.
    /// The item is skipped; the cycle continues.
    #[error("malformed item from {source_name}: {message}")]
    Malformed {
        source_name: String,
        message: String,
    },

    /// Notification channel failure (after retries are exhausted).
    #[error("notify error ({channel}): {message}")]
    Notify { channel: String, message: String },

    /// The dedup state file exists but cannot be parsed. Fatal at startup:
    /// silently resetting dedup history would re-notify everything.
    #[error("corrupt state file at {path:?}: {message}")]
    CorruptState { path: PathBuf, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StackwatchError>;

impl StackwatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a feed error tagged with the source it came from.
    pub fn feed(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Feed {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-item error tagged with the source it came from.
    pub fn malformed(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Malformed {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a notify error tagged with the channel name.
    pub fn notify(channel: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Notify {
            channel: channel.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = StackwatchError::config("missing stack section");
        assert_eq!(err.to_string(), "config error: missing stack section");

        let err = StackwatchError::feed("nvd", "HTTP 503");
        assert!(err.to_string().contains("nvd"));
        assert!(err.to_string().contains("503"));
    }
}
