use std::fmt;
use std::io;

use reqwest::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("{service} asked us to back off (HTTP 429)")]
    RateLimited { service: &'static str },
    #[error("{service} request failed ({status}): {message}")]
    Remote {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("worksheet {worksheet} row {row}: max distance {value:?} is not a number")]
    InvalidMaxDistance {
        worksheet: String,
        row: usize,
        value: String,
    },
    #[error("system lookup failed: {0}")]
    Lookup(String),
    #[error("{operation} did not finish within {seconds}s")]
    DeadlineExceeded { operation: String, seconds: u64 },
    #[error("{}", JoinedDisplay(.0))]
    Multiple(Vec<AppError>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("invalid input {input:?}: {reason}")]
    InvalidInput { input: String, reason: String },
    #[error("{0:?} is not a Google Spreadsheet URL or ID")]
    NotASpreadsheetUrl(String),
    #[error("unable to extract spreadsheet ID from {0:?}")]
    IdentifierNotFound(String),
}

impl AppError {
    /// Folds a batch of errors into one, keeping every member.
    pub fn join(mut errors: Vec<AppError>) -> Option<AppError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(AppError::Multiple(errors)),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            AppError::RateLimited { .. } => true,
            AppError::Remote { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS.as_u16(),
            AppError::Http(err) => err.status() == Some(StatusCode::TOO_MANY_REQUESTS),
            _ => false,
        }
    }

    /// Number of leaf errors, flattening nested joins.
    pub fn count(&self) -> usize {
        match self {
            AppError::Multiple(errors) => errors.iter().map(AppError::count).sum(),
            _ => 1,
        }
    }
}

struct JoinedDisplay<'a>(&'a [AppError]);

impl fmt::Display for JoinedDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, err) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
