use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Parses and validates configuration text
///
/// Missing sections and keys fall back to their defaults.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Loads and parses a configuration file from the given path
///
/// A relative `database-path` is resolved against the directory holding the
/// file, so a run behaves the same from any working directory.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use source_sentinel::config::load_config;
///
/// let config = load_config(Path::new("sentinel.toml")).unwrap();
/// println!("Workers: {}", config.politeness.workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// Hex-encoded SHA-256 of raw configuration text
///
/// The hash is recorded on every run so that runs made under different
/// politeness settings can be told apart.
pub fn hash_config_text(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once; the hash always describes the text that was parsed.
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to read, parse, or validate the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;

    let database = Path::new(&config.storage.database_path);
    if database.is_relative() {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            config.storage.database_path = dir.join(database).to_string_lossy().into_owned();
        }
    }

    Ok((config, hash_config_text(&content)))
}
