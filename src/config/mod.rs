//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use source_sentinel::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sentinel.toml")).unwrap();
//! println!("Min domain interval: {}ms", config.politeness.min_domain_interval_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, DetectionConfig, FetcherConfig, PolitenessConfig, StorageConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{hash_config_text, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
