//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading reference files, reading taxatables
/// or writing prediction tables.
#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{}:{line}: expected at least {expected} fields, found {found}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{}:{line}: invalid abundance '{value}' in column {col}", .path.display())]
    InvalidValue {
        path: PathBuf,
        line: usize,
        col: usize,
        value: String,
    },

    #[error("invalid taxonomic rank {0}, expected 1-8 or a rank name")]
    InvalidRank(String),

    #[error("empty data: {0}")]
    EmptyData(String),
}

pub type Result<T> = std::result::Result<T, FunctionError>;
