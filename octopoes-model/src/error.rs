use std::fmt::{self, Display};

/// Errors produced by model constructors, parsers and merge routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidReference(String),
    UnknownObjectType(String),
    ScanLevelOutOfRange(u8),
    InvalidPath(String),
    TypeMismatch { expected: String, found: String },
    Serialization(serde_json::Error),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidReference(value) => {
                write!(f, "invalid reference: {value}")
            }
            ModelError::UnknownObjectType(name) => {
                write!(f, "unknown object type: {name}")
            }
            ModelError::ScanLevelOutOfRange(level) => {
                write!(f, "scan level {level} is outside 0..=4")
            }
            ModelError::InvalidPath(msg) => write!(f, "invalid path: {msg}"),
            ModelError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            ModelError::Serialization(err) => {
                write!(f, "serialization error: {err}")
            }
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err)
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
