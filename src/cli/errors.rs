//! CLI-specific error types

use std::io;

use thiserror::Error;

use crate::errors::SearchError;

/// CLI error
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty input, expected one JSON query on stdin")]
    EmptyInput,
}

impl CliError {
    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Search(e) => e.code(),
            Self::Io(_) => "CLI_IO_ERROR",
            Self::Json(_) => "CLI_JSON_ERROR",
            Self::EmptyInput => "CLI_EMPTY_INPUT",
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
