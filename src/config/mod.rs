//! Configuration module for Sumi-Loom
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_loom::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("loom.toml")).unwrap();
//! println!("Politeness interval: {}ms", config.politeness.interval_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FetchConfig, FrontierKind, OutputConfig, PolitenessConfig, RetryConfig, RunnerKind,
    SchedulerConfig, SeedEntry, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
