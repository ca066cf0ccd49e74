//!
//! src/errors.rs
//!
//! Defines the error enum shared by every stage of a migration and the
//! conversions from the libraries we call into
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not authenticated with spotify, run the login flow again")]
    Unauthenticated,
    #[error("{service} unavailable: status {status}")]
    UpstreamUnavailable { service: &'static str, status: u16 },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for MigrateError {
    fn from(e: reqwest::Error) -> Self { MigrateError::Http(e.to_string()) }
}

impl From<serde_json::Error> for MigrateError {
    fn from(e: serde_json::Error) -> Self { MigrateError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for MigrateError {
    fn from(e: sqlx::Error) -> Self { MigrateError::Db(e.to_string()) }
}

impl From<url::ParseError> for MigrateError {
    fn from(e: url::ParseError) -> Self { MigrateError::Parse(format!("url: {e}")) }
}
