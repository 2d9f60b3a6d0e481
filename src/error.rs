// error.rs
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BigVisionError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing config key: {0}")]
    MissingKey(String),

    #[error("Type mismatch for `{key}`: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Config is locked, cannot add new key: {0}")]
    Locked(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },

    #[error("Preprocessing spec error at byte {offset}: {message}")]
    PpParse { offset: usize, message: String },

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Tree structure error: {0}")]
    Structure(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl BigVisionError {
    pub fn unknown(kind: &'static str, name: impl fmt::Display) -> Self {
        BigVisionError::Unknown {
            kind,
            name: name.to_string(),
        }
    }

    pub fn shape<E: fmt::Display>(error: E) -> Self {
        BigVisionError::Shape(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BigVisionError>;
