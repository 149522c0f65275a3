use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunerError {
    /// The capture file is missing, unreadable or its request line is malformed.
    #[error("invalid capture {}: {reason}", path.display())]
    InputFormat { path: PathBuf, reason: String },

    /// The request script couldn't be read, evaluated or lacks a usable `url`.
    #[error("couldn't load script {}: {reason}", path.display())]
    ScriptLoad { path: PathBuf, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("couldn't write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Raised by the http client, handed to the caller untouched.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl TunerError {
    pub fn input_format(path: impl Into<PathBuf>, reason: impl ToString) -> TunerError {
        TunerError::InputFormat { path: path.into(), reason: reason.to_string() }
    }

    pub fn script_load(path: impl Into<PathBuf>, reason: impl ToString) -> TunerError {
        TunerError::ScriptLoad { path: path.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;
