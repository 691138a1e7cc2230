use super::types::Config;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let config: Config = serde_json::from_str(&contents)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.source.s3.bucket.trim().is_empty() {
        return Err(ConfigError::Validation(
            "source.s3.bucket must not be empty".to_string(),
        ));
    }
    if config.source.tmpdir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "source.tmpdir must not be empty".to_string(),
        ));
    }
    if config.source.page_size == 0 {
        return Err(ConfigError::Validation(
            "source.page_size must be positive".to_string(),
        ));
    }
    if config.parser.tmpdir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "parser.tmpdir must not be empty".to_string(),
        ));
    }
    if config.parser.batch_max_docs == 0 {
        return Err(ConfigError::Validation(
            "parser.batch_max_docs must be positive".to_string(),
        ));
    }
    if config.elasticsearch.url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "elasticsearch.url must not be empty".to_string(),
        ));
    }

    Ok(())
}
