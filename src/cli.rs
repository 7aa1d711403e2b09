//! CLI command implementations for landclaim.

pub(crate) mod backups;
pub(crate) mod inspect;
pub(crate) mod owner;
pub(crate) mod upkeep;
pub(crate) mod validate;

mod output;

use clap::ValueEnum;
use landclaim::{Config, LandContext, Services};
use std::error::Error;
use std::fmt;
use std::path::Path;

/// Output format for the `inspect` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// CLI error type.
#[derive(Debug)]
pub(crate) struct CliError {
    message: String,
}

impl CliError {
    /// Create a new CLI error.
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for CliError {}

impl From<landclaim::OpenError> for CliError {
    fn from(e: landclaim::OpenError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<landclaim::ConfigError> for CliError {
    fn from(e: landclaim::ConfigError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<landclaim::StorageError> for CliError {
    fn from(e: landclaim::StorageError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Load the config (or defaults) and open the data directory.
pub(crate) fn open_context(data: &Path, config: Option<&Path>) -> Result<LandContext, CliError> {
    let config = match config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    Ok(LandContext::open(data, config, Services::offline())?)
}
