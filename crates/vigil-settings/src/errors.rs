//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid settings document.
    #[error("malformed settings document: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The merged settings cannot produce a working store.
    #[error("invalid database settings: {0}")]
    InvalidValue(String),
}

/// Result alias for settings loading.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/vigil.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("cannot read /etc/vigil.json: "));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("maxConn must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "invalid database settings: maxConn must be at least 1"
        );
    }
}
