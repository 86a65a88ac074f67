//! The page-provided `window.__web_sqlite` API, as seen from the content
//! script's MAIN world.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use web_sqlite_messaging::{ExecResult, LogEntry, OpfsEntry, QueryResult, TableSchema};

use crate::ApiError;

/// Receives the log events of one database.
pub type LogListener = Arc<dyn Fn(LogEntry) + Send + Sync>;

/// Receives the names of the open databases whenever they change.
pub type ChangeListener = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// What the page returns from its `subscribe` calls: calling
/// [PageSubscription::cancel] detaches the listener.
pub struct PageSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl PageSubscription {
    /// A subscription that runs `cancel` when canceled.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detach the listener.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for PageSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The database API the inspected page exposes.
#[async_trait]
pub trait WebSqliteApi: Send + Sync {
    /// Whether `window.__web_sqlite` exists.
    fn is_available(&self) -> bool;

    /// Names of the open databases.
    async fn databases(&self) -> Result<Vec<String>, ApiError>;

    /// Tables of `dbname`.
    async fn tables(&self, dbname: &str) -> Result<Vec<String>, ApiError>;

    /// Column layout of `table` in `dbname`.
    async fn table_schema(&self, dbname: &str, table: &str) -> Result<TableSchema, ApiError>;

    /// Run a row-returning statement.
    async fn query(
        &self,
        dbname: &str,
        sql: &str,
        params: Option<Value>,
    ) -> Result<QueryResult, ApiError>;

    /// Run a statement for its side effects.
    async fn exec(
        &self,
        dbname: &str,
        sql: &str,
        params: Option<Value>,
    ) -> Result<ExecResult, ApiError>;

    /// Call `listener` with every log event of `dbname`.
    fn subscribe_logs(
        &self,
        dbname: &str,
        listener: LogListener,
    ) -> Result<PageSubscription, ApiError>;

    /// Call `listener` whenever a database is opened or closed.
    fn subscribe_changes(&self, listener: ChangeListener) -> Result<PageSubscription, ApiError>;

    /// Entries of the OPFS directory at `path`.
    async fn opfs_list(&self, path: &str) -> Result<Vec<OpfsEntry>, ApiError>;

    /// Contents of the OPFS file at `path`.
    async fn opfs_read(&self, path: &str) -> Result<Vec<u8>, ApiError>;
}
