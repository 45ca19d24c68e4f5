//! Error types for warehouse access.

use thiserror::Error;

/// Failed to establish the warehouse session.
///
/// Fatal to the render cycle that triggered it. The core never retries;
/// callers that want retry should use bounded backoff around
/// `ConnectionProvider::get`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection parameters are missing or malformed.
    #[error("invalid warehouse configuration: {0}")]
    Config(String),

    /// The warehouse rejected the session or could not be reached.
    #[error("connection failed: {0}")]
    Unreachable(String),
}

/// A specific query failed.
///
/// Recoverable per-query: the presentation layer may render the datasets
/// that succeeded and degrade only the failing one. Every variant carries
/// the query text so the caller can tell which dataset is affected.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The warehouse reported a failure (syntax, missing view, permissions).
    #[error("query failed: {message} (query: {query})")]
    Execution { query: String, message: String },

    /// Execution exceeded the configured bound.
    #[error("query timed out after {timeout_secs}s (query: {query})")]
    Timeout { query: String, timeout_secs: u64 },

    /// A refresh returned a column list that no longer matches the schema
    /// recorded when the query was first cached.
    #[error("result schema changed: {details} (query: {query})")]
    SchemaMismatch { query: String, details: String },
}

impl QueryError {
    pub fn execution(query: impl Into<String>, message: impl ToString) -> Self {
        QueryError::Execution {
            query: query.into(),
            message: message.to_string(),
        }
    }
}
