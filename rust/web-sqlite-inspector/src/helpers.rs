//! In-memory stand-ins for the host browser and the inspected page.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use web_sqlite_messaging::{
    ColumnInfo, ExecResult, Inbox, LogEntry, OpfsEntry, OpfsEntryKind, QueryResult, TabId,
    TabMessenger, TableSchema, TransportError, WireMessage,
};

use crate::{ApiError, ChangeListener, LogListener, PageSubscription, WebSqliteApi};

#[derive(Default)]
struct Database {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
    answers: HashMap<String, QueryResult>,
    failures: HashMap<String, String>,
    statements: Vec<String>,
    log_listeners: Vec<(u64, LogListener)>,
}

#[derive(Default)]
struct Page {
    databases: BTreeMap<String, Database>,
    files: BTreeMap<String, Vec<u8>>,
    change_listeners: Vec<(u64, ChangeListener)>,
}

/// A [WebSqliteApi] over canned data.
///
/// Statements are not interpreted: queries return whatever was configured
/// with [MemoryWebSqlite::answer_query] (or no rows), and every statement is
/// recorded.
pub struct MemoryWebSqlite {
    page: Arc<Mutex<Page>>,
    unavailable: AtomicBool,
    next_listener: Arc<AtomicU64>,
}

impl Default for MemoryWebSqlite {
    fn default() -> Self {
        Self {
            page: Arc::new(Mutex::new(Page::default())),
            unavailable: AtomicBool::new(false),
            next_listener: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl MemoryWebSqlite {
    /// Toggle whether the page exposes the API at all.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    /// Open an empty database and notify change listeners.
    pub fn open_database(&self, dbname: &str) {
        self.page
            .lock()
            .databases
            .entry(dbname.to_string())
            .or_default();
        self.notify_changes();
    }

    /// Close a database and notify change listeners.
    pub fn close_database(&self, dbname: &str) {
        self.page.lock().databases.remove(dbname);
        self.notify_changes();
    }

    /// Add `table` with `columns` to an open database.
    pub fn add_table(&self, dbname: &str, table: &str, columns: Vec<ColumnInfo>) {
        if let Some(database) = self.page.lock().databases.get_mut(dbname) {
            database.tables.insert(table.to_string(), columns);
        }
    }

    /// Answer `sql` on `dbname` with `result`.
    pub fn answer_query(&self, dbname: &str, sql: &str, result: QueryResult) {
        if let Some(database) = self.page.lock().databases.get_mut(dbname) {
            database.answers.insert(sql.to_string(), result);
        }
    }

    /// Make `sql` on `dbname` fail with `message`.
    pub fn fail_statement(&self, dbname: &str, sql: &str, message: &str) {
        if let Some(database) = self.page.lock().databases.get_mut(dbname) {
            database
                .failures
                .insert(sql.to_string(), message.to_string());
        }
    }

    /// Every statement run against `dbname`, in order.
    pub fn statements(&self, dbname: &str) -> Vec<String> {
        self.page
            .lock()
            .databases
            .get(dbname)
            .map(|database| database.statements.clone())
            .unwrap_or_default()
    }

    /// Store a file in the origin private file system.
    pub fn put_file(&self, path: &str, bytes: Vec<u8>) {
        self.page.lock().files.insert(path.to_string(), bytes);
    }

    /// Emit a log event on `dbname`.
    pub fn emit_log(&self, dbname: &str, level: &str, data: Value) {
        let listeners: Vec<LogListener> = self
            .page
            .lock()
            .databases
            .get(dbname)
            .map(|database| {
                database
                    .log_listeners
                    .iter()
                    .map(|(_, listener)| listener.clone())
                    .collect()
            })
            .unwrap_or_default();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        for listener in listeners {
            listener(LogEntry {
                level: level.to_string(),
                data: data.clone(),
                timestamp,
            });
        }
    }

    /// Number of log listeners attached to `dbname`.
    pub fn log_listeners(&self, dbname: &str) -> usize {
        self.page
            .lock()
            .databases
            .get(dbname)
            .map(|database| database.log_listeners.len())
            .unwrap_or_default()
    }

    fn notify_changes(&self) {
        let (names, listeners): (Vec<String>, Vec<ChangeListener>) = {
            let page = self.page.lock();
            (
                page.databases.keys().cloned().collect(),
                page.change_listeners
                    .iter()
                    .map(|(_, listener)| listener.clone())
                    .collect(),
            )
        };
        for listener in listeners {
            listener(names.clone());
        }
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(ApiError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn run(&self, dbname: &str, sql: &str) -> Result<Option<QueryResult>, ApiError> {
        self.check()?;
        let mut page = self.page.lock();
        let database = page
            .databases
            .get_mut(dbname)
            .ok_or_else(|| ApiError::UnknownDatabase(dbname.to_string()))?;

        database.statements.push(sql.to_string());
        if let Some(message) = database.failures.get(sql) {
            return Err(ApiError::Sql(message.clone()));
        }
        Ok(database.answers.get(sql).cloned())
    }
}

#[async_trait]
impl WebSqliteApi for MemoryWebSqlite {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    async fn databases(&self) -> Result<Vec<String>, ApiError> {
        self.check()?;
        Ok(self.page.lock().databases.keys().cloned().collect())
    }

    async fn tables(&self, dbname: &str) -> Result<Vec<String>, ApiError> {
        self.check()?;
        self.page
            .lock()
            .databases
            .get(dbname)
            .map(|database| database.tables.keys().cloned().collect())
            .ok_or_else(|| ApiError::UnknownDatabase(dbname.to_string()))
    }

    async fn table_schema(&self, dbname: &str, table: &str) -> Result<TableSchema, ApiError> {
        self.check()?;
        let page = self.page.lock();
        let database = page
            .databases
            .get(dbname)
            .ok_or_else(|| ApiError::UnknownDatabase(dbname.to_string()))?;
        let columns = database
            .tables
            .get(table)
            .ok_or_else(|| ApiError::UnknownTable {
                dbname: dbname.to_string(),
                table: table.to_string(),
            })?;

        Ok(TableSchema {
            table: table.to_string(),
            columns: columns.clone(),
            sql: None,
        })
    }

    async fn query(
        &self,
        dbname: &str,
        sql: &str,
        _params: Option<Value>,
    ) -> Result<QueryResult, ApiError> {
        Ok(self.run(dbname, sql)?.unwrap_or(QueryResult {
            columns: Vec::new(),
            rows: Vec::new(),
        }))
    }

    async fn exec(
        &self,
        dbname: &str,
        sql: &str,
        _params: Option<Value>,
    ) -> Result<ExecResult, ApiError> {
        let changes = self
            .run(dbname, sql)?
            .map(|result| u64::try_from(result.rows.len()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Ok(ExecResult {
            changes,
            last_insert_row_id: None,
        })
    }

    fn subscribe_logs(
        &self,
        dbname: &str,
        listener: LogListener,
    ) -> Result<PageSubscription, ApiError> {
        self.check()?;
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.page
            .lock()
            .databases
            .get_mut(dbname)
            .ok_or_else(|| ApiError::UnknownDatabase(dbname.to_string()))?
            .log_listeners
            .push((id, listener));

        let page = self.page.clone();
        let dbname = dbname.to_string();
        Ok(PageSubscription::new(move || {
            if let Some(database) = page.lock().databases.get_mut(&dbname) {
                database.log_listeners.retain(|(other, _)| *other != id);
            }
        }))
    }

    fn subscribe_changes(&self, listener: ChangeListener) -> Result<PageSubscription, ApiError> {
        self.check()?;
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.page.lock().change_listeners.push((id, listener));

        let page = self.page.clone();
        Ok(PageSubscription::new(move || {
            page.lock()
                .change_listeners
                .retain(|(other, _)| *other != id);
        }))
    }

    async fn opfs_list(&self, path: &str) -> Result<Vec<OpfsEntry>, ApiError> {
        self.check()?;
        let directory = path.trim_end_matches('/');
        let prefix = format!("{directory}/");

        let page = self.page.lock();
        let mut entries: BTreeMap<String, OpfsEntry> = BTreeMap::new();
        for (file, bytes) in &page.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((child, _)) => OpfsEntry {
                    name: child.to_string(),
                    path: format!("{prefix}{child}"),
                    kind: OpfsEntryKind::Directory,
                    size: None,
                },
                None => OpfsEntry {
                    name: rest.to_string(),
                    path: file.clone(),
                    kind: OpfsEntryKind::File,
                    size: Some(u64::try_from(bytes.len()).unwrap_or(u64::MAX)),
                },
            };
            entries.entry(entry.name.clone()).or_insert(entry);
        }

        if entries.is_empty() && !directory.is_empty() {
            return Err(ApiError::NotFound(path.to_string()));
        }
        Ok(entries.into_values().collect())
    }

    async fn opfs_read(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        self.check()?;
        self.page
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(path.to_string()))
    }
}

/// Message the host reports when a tab has no content script listening.
pub const NO_RECEIVING_END: &str =
    "Could not establish connection. Receiving end does not exist.";

#[derive(Default)]
struct Tabs {
    active: Option<TabId>,
    content: HashMap<TabId, Arc<dyn Inbox>>,
}

/// A [TabMessenger] over in-process content scripts.
#[derive(Clone, Default)]
pub struct TabHost {
    tabs: Arc<Mutex<Tabs>>,
}

impl TabHost {
    /// Load a content script serving `inbox` into `tab`.
    pub fn attach<I>(&self, tab: TabId, inbox: I)
    where
        I: Inbox + 'static,
    {
        self.tabs.lock().content.insert(tab, Arc::new(inbox));
    }

    /// Unload the content script of `tab`.
    pub fn detach(&self, tab: TabId) {
        self.tabs.lock().content.remove(&tab);
    }

    /// Make `tab` the inspected tab.
    pub fn activate(&self, tab: TabId) {
        self.tabs.lock().active = Some(tab);
    }

    /// Leave no tab inspected.
    pub fn deactivate(&self) {
        self.tabs.lock().active = None;
    }
}

#[async_trait]
impl TabMessenger for TabHost {
    async fn active_tab(&self) -> Result<Option<TabId>, TransportError> {
        Ok(self.tabs.lock().active)
    }

    async fn send_to_tab(
        &self,
        tab: TabId,
        message: WireMessage,
    ) -> Result<Option<WireMessage>, TransportError> {
        let content = self.tabs.lock().content.get(&tab).cloned();
        match content {
            Some(content) => Ok(content.receive(message).await),
            None => Err(TransportError::Host(NO_RECEIVING_END.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use testresult::TestResult;

    #[tokio::test]
    async fn it_reports_file_sizes_and_affected_rows() -> TestResult {
        let api = MemoryWebSqlite::default();
        api.open_database("app.db");
        api.answer_query(
            "app.db",
            "DELETE FROM users",
            QueryResult {
                columns: Vec::new(),
                rows: vec![json!({ "id": 1 }), json!({ "id": 2 })],
            },
        );
        api.put_file("/data/app.db", vec![0; 4096]);
        api.put_file("/data/wal/app.db-wal", vec![0; 12]);

        let entries = api.opfs_list("/data").await?;
        assert_eq!(
            entries
                .iter()
                .map(|entry| (entry.name.as_str(), entry.size))
                .collect::<Vec<_>>(),
            vec![("app.db", Some(4096)), ("wal", None)]
        );

        let result = api.exec("app.db", "DELETE FROM users", None).await?;
        assert_eq!(result.changes, 2);
        Ok(())
    }
}
