//! The panel's typed client for the background.

use std::{convert::Infallible, future::Future};

use serde_json::Value;
use web_sqlite_messaging::{
    ChannelError, ConnectionMonitor, ContextId, DATABASES_CHANGED, DatabaseRef, DatabasesChanged,
    EXEC_SQL, ExecResult, GET_DATABASES, GET_TABLE_SCHEMA, GET_TABLES, HEARTBEAT, HeartbeatConfig,
    HeartbeatStatus, LOG_BATCH, LOG_SUBSCRIBE, LOG_UNSUBSCRIBE, LogBatch, Messenger, OPFS_DOWNLOAD,
    OPFS_LIST, OpfsEntry, OpfsFile, OpfsPath, PortEnd, QUERY_SQL, QueryResult, SqlRequest,
    Subscription, TableRef, TableSchema,
};

/// The DevTools panel's typed view of the page.
#[derive(Debug, Clone)]
pub struct PanelClient {
    messenger: Messenger,
}

impl PanelClient {
    /// Talk to the background over the panel's end of its port.
    pub fn connect(end: PortEnd) -> Self {
        Self::new(Messenger::over_port(ContextId::Panel, end))
    }

    /// Use an existing panel messenger.
    pub fn new(messenger: Messenger) -> Self {
        Self { messenger }
    }

    /// The underlying messenger.
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Whether the page API is reachable, and how many databases it has open.
    pub async fn heartbeat(&self) -> Result<HeartbeatStatus, ChannelError> {
        HEARTBEAT.send(&self.messenger, ()).await
    }

    /// Names of the open databases.
    pub async fn databases(&self) -> Result<Vec<String>, ChannelError> {
        GET_DATABASES.send(&self.messenger, ()).await
    }

    /// Tables of `dbname`.
    pub async fn tables(&self, dbname: &str) -> Result<Vec<String>, ChannelError> {
        GET_TABLES.send(&self.messenger, database(dbname)).await
    }

    /// Column layout of `table`.
    pub async fn table_schema(&self, dbname: &str, table: &str) -> Result<TableSchema, ChannelError> {
        GET_TABLE_SCHEMA
            .send(
                &self.messenger,
                TableRef {
                    dbname: dbname.to_string(),
                    table: table.to_string(),
                },
            )
            .await
    }

    /// Run a row-returning statement.
    pub async fn query(
        &self,
        dbname: &str,
        sql: &str,
        params: Option<Value>,
    ) -> Result<QueryResult, ChannelError> {
        QUERY_SQL
            .send(&self.messenger, statement(dbname, sql, params))
            .await
    }

    /// Run a statement for its side effects.
    pub async fn exec(
        &self,
        dbname: &str,
        sql: &str,
        params: Option<Value>,
    ) -> Result<ExecResult, ChannelError> {
        EXEC_SQL
            .send(&self.messenger, statement(dbname, sql, params))
            .await
    }

    /// Start streaming the logs of `dbname` to [PanelClient::on_log_batch].
    pub async fn subscribe_logs(&self, dbname: &str) -> Result<(), ChannelError> {
        LOG_SUBSCRIBE.send(&self.messenger, database(dbname)).await
    }

    /// Stop streaming the logs of `dbname`.
    pub async fn unsubscribe_logs(&self, dbname: &str) -> Result<(), ChannelError> {
        LOG_UNSUBSCRIBE.send(&self.messenger, database(dbname)).await
    }

    /// Entries of the OPFS directory at `path`.
    pub async fn opfs_list(&self, path: &str) -> Result<Vec<OpfsEntry>, ChannelError> {
        OPFS_LIST.send(&self.messenger, opfs(path)).await
    }

    /// Contents of the OPFS file at `path`.
    pub async fn opfs_download(&self, path: &str) -> Result<OpfsFile, ChannelError> {
        OPFS_DOWNLOAD.send(&self.messenger, opfs(path)).await
    }

    /// Receive log batches pushed by the content script.
    pub async fn on_log_batch<F, Fut>(&self, handler: F) -> Result<Subscription, ChannelError>
    where
        F: Fn(LogBatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        LOG_BATCH
            .on(&self.messenger, move |batch| {
                let handled = handler(batch);
                async move {
                    handled.await;
                    Ok::<_, Infallible>(())
                }
            })
            .await
    }

    /// Receive the database list whenever the page opens or closes one.
    pub async fn on_databases_changed<F, Fut>(
        &self,
        handler: F,
    ) -> Result<Subscription, ChannelError>
    where
        F: Fn(DatabasesChanged) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        DATABASES_CHANGED
            .on(&self.messenger, move |changed| {
                let handled = handler(changed);
                async move {
                    handled.await;
                    Ok::<_, Infallible>(())
                }
            })
            .await
    }

    /// Track whether the page stays reachable.
    pub fn monitor(&self, config: &HeartbeatConfig) -> ConnectionMonitor {
        ConnectionMonitor::start(self.messenger.clone(), config)
    }
}

fn database(dbname: &str) -> DatabaseRef {
    DatabaseRef {
        dbname: dbname.to_string(),
    }
}

fn statement(dbname: &str, sql: &str, params: Option<Value>) -> SqlRequest {
    SqlRequest {
        dbname: dbname.to_string(),
        sql: sql.to_string(),
        params,
    }
}

fn opfs(path: &str) -> OpfsPath {
    OpfsPath {
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Background, ContentScript, MemoryWebSqlite, TabHost};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use testresult::TestResult;
    use web_sqlite_messaging::{
        ColumnInfo, ConnectionState, MessagingConfig, NO_ACTIVE_TAB, OpfsEntryKind, TabId,
    };

    #[tokio::test]
    async fn it_browses_the_page_through_the_background() -> TestResult {
        let tabs = TabHost::default();
        let background = Background::start(MessagingConfig::default(), tabs.clone()).await?;

        let api = Arc::new(MemoryWebSqlite::default());
        api.open_database("app.db");
        api.add_table(
            "app.db",
            "users",
            vec![ColumnInfo {
                name: "id".into(),
                declared_type: "INTEGER".into(),
                not_null: true,
                primary_key: true,
                default_value: None,
            }],
        );
        api.put_file("/app.db", vec![0; 4]);
        api.put_file("/backups/app.db", vec![0; 2]);

        let content = Messenger::satellite(ContextId::ContentIsolated, background.content_uplink());
        let _script = ContentScript::install(content.clone(), api, background.config()).await?;
        tabs.attach(TabId(1), content.inbox());
        tabs.activate(TabId(1));

        let panel = PanelClient::connect(background.connect_panel());

        assert_eq!(panel.databases().await?, vec!["app.db".to_string()]);
        assert_eq!(panel.tables("app.db").await?, vec!["users".to_string()]);

        let schema = panel.table_schema("app.db", "users").await?;
        assert_eq!(schema.columns.len(), 1);
        assert!(schema.columns[0].primary_key);

        let listing = panel.opfs_list("/").await?;
        assert_eq!(
            listing
                .iter()
                .map(|entry| (entry.name.as_str(), entry.kind))
                .collect::<Vec<_>>(),
            vec![
                ("app.db", OpfsEntryKind::File),
                ("backups", OpfsEntryKind::Directory)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_surfaces_a_missing_tab() -> TestResult {
        let background = Background::start(MessagingConfig::default(), TabHost::default()).await?;
        let panel = PanelClient::connect(background.connect_panel());

        assert_eq!(
            panel.databases().await,
            Err(ChannelError::Rejected(NO_ACTIVE_TAB.into()))
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_monitors_the_page() -> TestResult {
        let tabs = TabHost::default();
        let background = Background::start(MessagingConfig::default(), tabs.clone()).await?;
        let panel = PanelClient::connect(background.connect_panel());
        let config = HeartbeatConfig::default();

        let monitor = panel.monitor(&config);
        let mut states = monitor.subscribe();

        // Nothing answers without a tab
        states.changed().await?;
        assert!(matches!(
            *states.borrow(),
            ConnectionState::Reconnecting { .. }
        ));

        let content = Messenger::satellite(ContextId::ContentIsolated, background.content_uplink());
        let _script = ContentScript::install(
            content.clone(),
            Arc::new(MemoryWebSqlite::default()),
            background.config(),
        )
        .await?;
        tabs.attach(TabId(1), content.inbox());
        tabs.activate(TabId(1));

        states
            .wait_for(|state| *state == ConnectionState::Connected)
            .await?;
        monitor.stop();
        Ok(())
    }
}
