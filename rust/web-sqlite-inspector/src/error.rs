//! Errors from the page API and from wiring the extension contexts.

use thiserror::Error;
use web_sqlite_messaging::{ChannelError, ConfigError};

/// Failures reported by the page's `window.__web_sqlite` API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The page does not expose the API.
    #[error("web-sqlite is not available on this page")]
    Unavailable,

    /// No open database has this name.
    #[error("Database \"{0}\" not found")]
    UnknownDatabase(String),

    /// The database has no such table.
    #[error("Table \"{table}\" not found in database \"{dbname}\"")]
    UnknownTable {
        /// The database that was searched.
        dbname: String,
        /// The missing table.
        table: String,
    },

    /// SQLite rejected a statement; the message is SQLite's own.
    #[error("{0}")]
    Sql(String),

    /// No OPFS entry exists at this path.
    #[error("OPFS entry \"{0}\" not found")]
    NotFound(String),

    /// Any other failure raised by the page.
    #[error("{0}")]
    Host(String),
}

/// Errors raised by the inspector's contexts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InspectorError {
    /// The page API failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A log stream for this database is already running.
    #[error("Logs of database \"{0}\" are already being streamed")]
    AlreadySubscribed(String),

    /// Messaging failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
