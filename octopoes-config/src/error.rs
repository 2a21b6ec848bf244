use std::path::PathBuf;

use thiserror::Error;

/// Failure to read, parse or validate settings.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The config text is neither valid TOML nor valid JSON settings.
    #[error("failed to parse config {origin}: {message}")]
    Parse {
        /// File path or variable the text came from.
        origin: String,
        /// Parser diagnostics.
        message: String,
    },

    /// An environment override did not parse.
    #[error("invalid value for {key}: {message}")]
    InvalidEnv {
        /// Environment variable name.
        key: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// A connection URL did not parse.
    #[error("invalid {field} url: {source}")]
    InvalidUrl {
        /// Settings section holding the URL.
        field: &'static str,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// A value failed validation.
    #[error("{0}")]
    Invalid(String),
}
