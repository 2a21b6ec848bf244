use octopoes_model::{ModelError, Reference};
use thiserror::Error;

use crate::events::broker::BrokerError;

#[derive(Error, Debug)]
pub enum OctopoesError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Source {0} does not exist")]
    SourceNotFound(Reference),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Session already committed")]
    SessionAlreadyCommitted,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Bit {bit_id} failed: {message}")]
    Bit { bit_id: String, message: String },
}

impl OctopoesError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OctopoesError::NotFound(_))
    }
}

impl From<reqwest::Error> for OctopoesError {
    fn from(err: reqwest::Error) -> Self {
        OctopoesError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OctopoesError>;

/// Turns a `NotFound` failure into `Ok(None)`; absence is routine for
/// lookups that precede a write.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
