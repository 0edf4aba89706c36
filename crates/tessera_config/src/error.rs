//! Failures reading `tessera.toml`.

use std::path::PathBuf;

/// Why a cache configuration could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        /// File that was opened.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has a field of the wrong type.
    #[error("malformed cache configuration: {0}")]
    Malformed(String),

    /// A setting holds a value the engine cannot run with.
    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting {
        /// Dotted key, e.g. `cache.dir`.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ConfigError {
    /// Whether the configuration file simply does not exist.
    pub fn is_missing_file(&self) -> bool {
        matches!(
            self,
            ConfigError::Unreadable { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_setting_names_the_key() {
        let err = ConfigError::InvalidSetting {
            key: "serialization.max_bean_depth",
            reason: "must be greater than zero",
        };
        assert_eq!(
            err.to_string(),
            "invalid setting `serialization.max_bean_depth`: must be greater than zero"
        );
    }

    #[test]
    fn only_not_found_counts_as_missing() {
        let unreadable = |kind| ConfigError::Unreadable {
            path: PathBuf::from("tessera.toml"),
            source: std::io::Error::new(kind, "boom"),
        };
        assert!(unreadable(std::io::ErrorKind::NotFound).is_missing_file());
        assert!(!unreadable(std::io::ErrorKind::PermissionDenied).is_missing_file());
        assert!(!ConfigError::Malformed("x".into()).is_missing_file());
        assert!(unreadable(std::io::ErrorKind::NotFound)
            .to_string()
            .starts_with("cannot read tessera.toml:"));
    }
}
