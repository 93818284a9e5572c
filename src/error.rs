//! Error types and result handling for oplog-relay.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! The taxonomy mirrors how failures are handled rather than where they
//! originate: connection and statement failures end the current tail session
//! and are absorbed by the reconnect loop, while a checkpoint read failure at
//! startup is fatal.

use thiserror::Error;

/// The main error type for oplog-relay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error: unreadable file, invalid URL, bad field mapping.
    #[error("Configuration error: {0}")]
    Config(String),

    /// MongoDB client, cursor, or protocol error.
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// MySQL client or statement error.
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// I/O error, typically while reading the configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while parsing the configuration file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Target connection failure surfaced to waiters of a shared
    /// connection attempt.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure reading the persisted replication position at startup.
    /// Treated as terminal by the orchestrator.
    #[error("Checkpoint error: {message}")]
    Checkpoint {
        /// Description of the checkpoint failure
        message: String,
    },

    /// An oplog entry missing a field the translation needs.
    #[error("Malformed oplog entry: {message}")]
    InvalidEntry {
        /// Description of what was missing or malformed
        message: String,
    },
}

/// A convenient Result type alias for oplog-relay operations.
pub type Result<T> = std::result::Result<T, Error>;
