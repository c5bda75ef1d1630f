//!
//! src/errors.rs  Andrew Belles  Oct 19th, 2026
//!
//! Defines enums and methods of error conversion
//! for errors the etl uses
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("malformed payload at {source_location}: {reason}")]
    MalformedPayload { source_location: String, reason: String },
    #[error(
        "incomplete {table} record: item {position} of {source_location} \
         (item {index} of batch) missing {field}"
    )]
    IncompleteRecord {
        table: &'static str,
        /// Position in the flattened batch
        index: usize,
        /// Position within the page at `source_location`
        position: usize,
        field: String,
        source_location: String
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("promotion incomplete, {} object(s) failed: {:?}", .failed.len(), .failed)]
    PromotionPartialFailure { failed: Vec<String> },
    #[error("task error: {0}")]
    Task(String),
    #[error("run cancelled before {0}")]
    Cancelled(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for EtlError {
    fn from(e: reqwest::Error) -> Self { EtlError::Http(e.to_string()) }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self { EtlError::Parse(e.to_string()) }
}

impl From<csv::Error> for EtlError {
    fn from(e: csv::Error) -> Self { EtlError::Serialization(e.to_string()) }
}

impl From<url::ParseError> for EtlError {
    fn from(e: url::ParseError) -> Self { EtlError::Config(e.to_string()) }
}

impl From<tokio::task::JoinError> for EtlError {
    fn from(e: tokio::task::JoinError) -> Self {
        EtlError::Task(e.to_string())
    }
}
