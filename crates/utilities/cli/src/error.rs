//! Error types for CLI utilities.

use marlin_genesis::{ChainConfigError, NetworkParseError};
use std::{io, path::PathBuf};
use thiserror::Error;

/// Error type for prometheus server initialization.
#[derive(Debug, Error)]
pub enum PrometheusError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] io::Error),
    /// Failed to install the exporter.
    #[error("failed to install prometheus exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),
}

/// Errors raised while turning flags into configuration. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum CliError {
    /// The network is not in the registry.
    #[error(transparent)]
    UnsupportedNetwork(#[from] NetworkParseError),
    /// The chain configuration file could not be loaded.
    #[error("invalid chain configuration: {0}")]
    ChainConfig(#[from] ChainConfigError),
    /// A required archive directory does not exist.
    #[error("archive directory {0} does not exist")]
    MissingEraDir(PathBuf),
    /// Error initializing metrics.
    #[error("failed to initialize metrics: {0}")]
    MetricsInitialization(#[from] PrometheusError),
}

/// Type alias for CLI results.
pub type CliResult<T> = Result<T, CliError>;
