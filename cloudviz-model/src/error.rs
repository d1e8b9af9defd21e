use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownProvider(String),
    UnknownJobKind(String),
    UnknownStatus(String),
    UnknownScope(String),
    UnknownCostCategory(String),
    UnknownFormat(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownProvider(raw) => write!(f, "unknown cloud provider: {raw}"),
            ModelError::UnknownJobKind(raw) => write!(f, "unknown job kind: {raw}"),
            ModelError::UnknownStatus(raw) => write!(f, "unknown job status: {raw}"),
            ModelError::UnknownScope(raw) => write!(f, "unknown extraction scope: {raw}"),
            ModelError::UnknownCostCategory(raw) => write!(f, "unknown cost category: {raw}"),
            ModelError::UnknownFormat(raw) => write!(f, "unknown output format: {raw}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
