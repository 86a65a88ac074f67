//! The channels spoken between the panel, the background and the content
//! script, with their payload types.
//!
//! The names are a stable contract: every context must agree on them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Channel, LogEntry};

/// Liveness probe answered by the content script.
pub const HEARTBEAT: Channel<(), HeartbeatStatus> = Channel::new("heartbeat");
/// Names of the databases the page has opened.
pub const GET_DATABASES: Channel<(), Vec<String>> = Channel::new("get-databases");
/// Tables of one database.
pub const GET_TABLES: Channel<DatabaseRef, Vec<String>> = Channel::new("get-tables");
/// Column layout of one table.
pub const GET_TABLE_SCHEMA: Channel<TableRef, TableSchema> = Channel::new("get-table-schema");
/// Run a statement that returns rows.
pub const QUERY_SQL: Channel<SqlRequest, QueryResult> = Channel::new("query-sql");
/// Run a statement for its side effects.
pub const EXEC_SQL: Channel<SqlRequest, ExecResult> = Channel::new("exec-sql");
/// Start streaming the log of one database to the panel.
pub const LOG_SUBSCRIBE: Channel<DatabaseRef, ()> = Channel::new("log:subscribe");
/// Stop streaming the log of one database.
pub const LOG_UNSUBSCRIBE: Channel<DatabaseRef, ()> = Channel::new("log:unsubscribe");
/// A batch of log entries, sent by the content script to the panel.
pub const LOG_BATCH: Channel<LogBatch, ()> = Channel::new("log:batch");
/// The set of open databases changed, sent by the content script to the
/// panel.
pub const DATABASES_CHANGED: Channel<DatabasesChanged, ()> = Channel::new("databases:changed");
/// Entries of one directory of the origin private file system.
pub const OPFS_LIST: Channel<OpfsPath, Vec<OpfsEntry>> = Channel::new("opfs:list");
/// Contents of one OPFS file.
pub const OPFS_DOWNLOAD: Channel<OpfsPath, OpfsFile> = Channel::new("opfs:download");

/// Channels the background relays from the panel to the content script of
/// the inspected tab.
pub const PANEL_CHANNELS: &[&str] = &[
    HEARTBEAT.name(),
    GET_DATABASES.name(),
    GET_TABLES.name(),
    GET_TABLE_SCHEMA.name(),
    QUERY_SQL.name(),
    EXEC_SQL.name(),
    LOG_SUBSCRIBE.name(),
    LOG_UNSUBSCRIBE.name(),
    OPFS_LIST.name(),
    OPFS_DOWNLOAD.name(),
];

/// Answer to a [HEARTBEAT].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStatus {
    /// Whether the page exposes `window.__web_sqlite`.
    pub available: bool,
    /// Number of databases the page has opened.
    pub database_count: usize,
}

/// Names one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRef {
    /// Database name as known to the page.
    pub dbname: String,
}

/// Names one table of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    /// Database name as known to the page.
    pub dbname: String,
    /// Table name.
    pub table: String,
}

/// A SQL statement to run against one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlRequest {
    /// Database name as known to the page.
    pub dbname: String,
    /// The statement.
    pub sql: String,
    /// Bound parameters, positional (array) or named (object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Rows returned by [QUERY_SQL].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// One object per row, keyed by column name.
    pub rows: Vec<Value>,
}

/// Outcome of [EXEC_SQL].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    /// Rows modified by the statement.
    pub changes: u64,
    /// Row id of the last inserted row, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_insert_row_id: Option<i64>,
}

/// One column as described by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, possibly empty.
    #[serde(rename = "type")]
    pub declared_type: String,
    /// Whether the column is `NOT NULL`.
    pub not_null: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Default value expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Answer to [GET_TABLE_SCHEMA].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub table: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// The `CREATE TABLE` statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// Payload of [LOG_BATCH].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    /// The database the entries belong to.
    pub dbname: String,
    /// Entries, oldest first.
    pub entries: Vec<LogEntry>,
}

/// Payload of [DATABASES_CHANGED].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasesChanged {
    /// Names of the databases open after the change.
    pub databases: Vec<String>,
}

/// A path in the origin private file system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpfsPath {
    /// Slash separated, `"/"` being the root.
    #[serde(default = "root")]
    pub path: String,
}

fn root() -> String {
    "/".to_string()
}

/// What an [OpfsEntry] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpfsEntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// One item of an OPFS directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpfsEntry {
    /// Entry name.
    pub name: String,
    /// Full path.
    pub path: String,
    /// File or directory.
    pub kind: OpfsEntryKind,
    /// Size in bytes, files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Answer to [OPFS_DOWNLOAD].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpfsFile {
    /// Full path.
    pub path: String,
    /// File contents.
    pub bytes: Vec<u8>,
}
