//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `qbplan.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required value is missing or zero where a positive one is needed.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_field() {
        let err = ConfigError::MissingField("anneal.times".to_string());
        assert_eq!(err.to_string(), "missing required field: anneal.times");
    }

    #[test]
    fn display_validation_error() {
        let err = ConfigError::ValidationError("moves.rotate must be in [0, 1]".to_string());
        assert_eq!(
            err.to_string(),
            "validation error: moves.rotate must be in [0, 1]"
        );
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ConfigError::from(io_err);
        assert!(err.to_string().starts_with("failed to read configuration:"));
    }
}
