use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("network error: {message}")]
    Network { message: String, transient: bool },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid category `{0}` (expected one of 蔬菜, 水果, 肉禽蛋, 水产, 粮油, 豆制品, 调料)")]
    InvalidCategory(String),

    #[error("invalid date range: start {start} is after end {end}")]
    Range { start: NaiveDate, end: NaiveDate },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("authorization error: {0} (run `feishu-auth --auth` or `feishu-auth --simple`)")]
    Auth(String),

    #[error("Feishu rejected {operation} (code {code}): {msg}")]
    RemoteApi {
        operation: String,
        code: i64,
        msg: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn network(message: impl Into<String>, transient: bool) -> Self {
        AppError::Network {
            message: message.into(),
            transient,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }

    /// Only transient network failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Network { transient: true, .. })
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
