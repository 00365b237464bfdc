//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::FloorplanConfig;
use std::path::Path;

/// File name looked up by [`load_config`].
pub const CONFIG_FILE_NAME: &str = "qbplan.toml";

/// Loads and validates `<dir>/qbplan.toml`.
pub fn load_config(dir: &Path) -> Result<FloorplanConfig, ConfigError> {
    let content = std::fs::read_to_string(dir.join(CONFIG_FILE_NAME))?;
    load_config_from_str(&content)
}

/// Parses and validates a configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<FloorplanConfig, ConfigError> {
    let config: FloorplanConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn probability(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must not be negative, got {value}"
        )))
    }
}

/// Checks that every value is inside the range the driver can work with.
pub fn validate_config(config: &FloorplanConfig) -> Result<(), ConfigError> {
    let anneal = &config.anneal;
    if anneal.times == 0 {
        return Err(ConfigError::MissingField("anneal.times".to_string()));
    }
    if anneal.max_retries == 0 {
        return Err(ConfigError::MissingField("anneal.max_retries".to_string()));
    }
    positive("anneal.term_temp", anneal.term_temp)?;
    positive("anneal.init_avg", anneal.init_avg)?;
    positive("anneal.avg_ratio", anneal.avg_ratio)?;
    positive("anneal.lambda", anneal.lambda)?;
    probability("anneal.conv_rate", anneal.conv_rate)?;
    if !(anneal.init_prob > 0.0 && anneal.init_prob < 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "anneal.init_prob must be in (0, 1), got {}",
            anneal.init_prob
        )));
    }

    let cost = &config.cost;
    non_negative("cost.wirelength", cost.wirelength)?;
    non_negative("cost.out_of_bound", cost.out_of_bound)?;
    non_negative("cost.area", cost.area)?;
    non_negative("cost.violation", cost.violation)?;
    if !(cost.area_overflow_penalty.is_finite() && cost.area_overflow_penalty >= 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "cost.area_overflow_penalty must be at least 1, got {}",
            cost.area_overflow_penalty
        )));
    }

    probability("moves.rotate", config.moves.rotate)?;
    probability("moves.swap", config.moves.swap)?;
    probability("moves.leaf", config.moves.leaf)?;

    let partition = &config.partition;
    if !(partition.root_scale.is_finite() && partition.root_scale >= 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "partition.root_scale must be at least 1, got {}",
            partition.root_scale
        )));
    }
    non_negative("partition.crossing", partition.crossing)?;
    non_negative("partition.offset", partition.offset)?;
    non_negative("partition.gap", partition.gap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, FloorplanConfig::default());
        assert_eq!(config.anneal.times, 30);
        assert_eq!(config.anneal.local, 7);
        assert_eq!(config.cost.area, 0.25);
        assert_eq!(config.moves.rotate, 0.3);
        assert!(config.partition.anchor);
        assert!(config.anneal.seed.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[anneal]
times = 10
local = 3
term_temp = 0.05
seed = 7
max_iterations = 500

[cost]
wirelength = 0.001
violation = 2.0

[moves]
rotate = 0.2
swap = 0.6
leaf = 0.1

[partition]
root_scale = 2.0
anchor = false
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.anneal.times, 10);
        assert_eq!(config.anneal.local, 3);
        assert_eq!(config.anneal.seed, Some(7));
        assert_eq!(config.anneal.max_iterations, 500);
        assert_eq!(config.anneal.lambda, 1.3);
        assert_eq!(config.cost.wirelength, 0.001);
        assert_eq!(config.cost.area, 0.25);
        assert_eq!(config.moves.swap, 0.6);
        assert_eq!(config.partition.root_scale, 2.0);
        assert!(!config.partition.anchor);
    }

    #[test]
    fn reject_zero_times() {
        let err = load_config_from_str("[anneal]\ntimes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "anneal.times"));
    }

    #[test]
    fn reject_probability_out_of_range() {
        let err = load_config_from_str("[moves]\nrotate = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn reject_degenerate_init_prob() {
        let err = load_config_from_str("[anneal]\ninit_prob = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn reject_small_root_scale() {
        let err = load_config_from_str("[partition]\nroot_scale = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn reject_malformed_toml() {
        let err = load_config_from_str("[anneal\ntimes = 3").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[anneal]\nlocal = 2\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.anneal.local, 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
