//! Content script side of the inspector.
//!
//! The content script is the only extension context that can reach the
//! page's `window.__web_sqlite` API. It registers one handler per panel
//! channel; the background relays panel requests to it through the active
//! tab and relays its answers back.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use web_sqlite_messaging::{
    BatchSink, ChannelError, DatabaseRef, EXEC_SQL, ExecResult, GET_DATABASES, GET_TABLE_SCHEMA,
    GET_TABLES, HEARTBEAT, HeartbeatStatus, LOG_BATCH, LOG_SUBSCRIBE, LOG_UNSUBSCRIBE, LogBatch,
    LogEntry, LogStream, MessagingConfig, Messenger, OPFS_DOWNLOAD, OPFS_LIST, OpfsEntry,
    OpfsFile, OpfsPath, QUERY_SQL, QueryResult, RingBufferConfig, SqlRequest, Subscription,
    TableRef, TableSchema,
};

use crate::{ApiError, InspectorError, PageSubscription, WebSqliteApi};

struct ActiveStream {
    stream: Arc<LogStream>,
    page: PageSubscription,
}

struct Inner {
    messenger: Messenger,
    api: Arc<dyn WebSqliteApi>,
    ring_buffer: RingBufferConfig,
    streams: Mutex<HashMap<String, ActiveStream>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// The handlers a content script serves on behalf of the panel.
#[derive(Clone)]
pub struct ContentScript {
    inner: Arc<Inner>,
}

impl ContentScript {
    /// Register the page channels on `messenger`, answering them with
    /// `api`. If any registration fails the ones already made are undone.
    pub async fn install(
        messenger: Messenger,
        api: Arc<dyn WebSqliteApi>,
        config: &MessagingConfig,
    ) -> Result<Self, InspectorError> {
        config.validate()?;

        let script = Self {
            inner: Arc::new(Inner {
                messenger,
                api,
                ring_buffer: config.ring_buffer.clone(),
                streams: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        };

        if let Err(error) = script.register_all().await {
            script.uninstall().await;
            return Err(error.into());
        }

        tracing::debug!(
            context = %script.inner.messenger.context(),
            channels = script.inner.subscriptions.lock().len(),
            "Content script installed"
        );
        Ok(script)
    }

    async fn register_all(&self) -> Result<(), ChannelError> {
        let messenger = &self.inner.messenger;

        let this = self.clone();
        self.keep(
            HEARTBEAT
                .on(messenger, move |()| {
                    let this = this.clone();
                    async move { this.heartbeat().await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            GET_DATABASES
                .on(messenger, move |()| {
                    let this = this.clone();
                    async move { this.databases().await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            GET_TABLES
                .on(messenger, move |request: DatabaseRef| {
                    let this = this.clone();
                    async move { this.tables(&request.dbname).await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            GET_TABLE_SCHEMA
                .on(messenger, move |request: TableRef| {
                    let this = this.clone();
                    async move { this.table_schema(&request).await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            QUERY_SQL
                .on(messenger, move |request: SqlRequest| {
                    let this = this.clone();
                    async move { this.query(request).await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            EXEC_SQL
                .on(messenger, move |request: SqlRequest| {
                    let this = this.clone();
                    async move { this.exec(request).await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            LOG_SUBSCRIBE
                .on(messenger, move |request: DatabaseRef| {
                    let this = this.clone();
                    async move { this.subscribe_logs(request.dbname).await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            LOG_UNSUBSCRIBE
                .on(messenger, move |request: DatabaseRef| {
                    let this = this.clone();
                    async move {
                        this.unsubscribe_logs(&request.dbname);
                        Ok::<_, InspectorError>(())
                    }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            OPFS_LIST
                .on(messenger, move |request: OpfsPath| {
                    let this = this.clone();
                    async move { this.opfs_list(&request.path).await }
                })
                .await?,
        );

        let this = self.clone();
        self.keep(
            OPFS_DOWNLOAD
                .on(messenger, move |request: OpfsPath| {
                    let this = this.clone();
                    async move { this.opfs_download(request.path).await }
                })
                .await?,
        );

        Ok(())
    }

    fn keep(&self, subscription: Subscription) {
        self.inner.subscriptions.lock().push(subscription);
    }

    /// Unregister every handler and stop every log stream.
    pub async fn uninstall(&self) {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        for subscription in subscriptions {
            let channel = subscription.channel();
            if let Err(error) = subscription.cancel().await {
                tracing::warn!(channel, %error, "Failed to unregister handler");
            }
        }

        let streams = std::mem::take(&mut *self.inner.streams.lock());
        for (_, active) in streams {
            active.page.cancel();
            active.stream.destroy();
        }
    }

    /// Databases whose logs are currently streamed, sorted.
    pub fn log_streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.streams.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn available(&self) -> Result<&dyn WebSqliteApi, ApiError> {
        if self.inner.api.is_available() {
            Ok(self.inner.api.as_ref())
        } else {
            Err(ApiError::Unavailable)
        }
    }

    /// The API, once `dbname` is known to be open.
    async fn database(&self, dbname: &str) -> Result<&dyn WebSqliteApi, ApiError> {
        let api = self.available()?;
        if api.databases().await?.iter().any(|name| name == dbname) {
            Ok(api)
        } else {
            Err(ApiError::UnknownDatabase(dbname.to_string()))
        }
    }

    async fn heartbeat(&self) -> Result<HeartbeatStatus, ApiError> {
        let Ok(api) = self.available() else {
            return Ok(HeartbeatStatus {
                available: false,
                database_count: 0,
            });
        };
        Ok(HeartbeatStatus {
            available: true,
            database_count: api.databases().await?.len(),
        })
    }

    async fn databases(&self) -> Result<Vec<String>, ApiError> {
        self.available()?.databases().await
    }

    async fn tables(&self, dbname: &str) -> Result<Vec<String>, ApiError> {
        self.database(dbname).await?.tables(dbname).await
    }

    async fn table_schema(&self, request: &TableRef) -> Result<TableSchema, ApiError> {
        self.database(&request.dbname)
            .await?
            .table_schema(&request.dbname, &request.table)
            .await
    }

    async fn query(&self, request: SqlRequest) -> Result<QueryResult, ApiError> {
        tracing::debug!(dbname = %request.dbname, "Running query");
        self.database(&request.dbname)
            .await?
            .query(&request.dbname, &request.sql, request.params)
            .await
    }

    async fn exec(&self, request: SqlRequest) -> Result<ExecResult, ApiError> {
        tracing::debug!(dbname = %request.dbname, "Executing statement");
        self.database(&request.dbname)
            .await?
            .exec(&request.dbname, &request.sql, request.params)
            .await
    }

    async fn opfs_list(&self, path: &str) -> Result<Vec<OpfsEntry>, ApiError> {
        self.available()?.opfs_list(path).await
    }

    async fn opfs_download(&self, path: String) -> Result<OpfsFile, ApiError> {
        let bytes = self.available()?.opfs_read(&path).await?;
        Ok(OpfsFile { path, bytes })
    }

    async fn subscribe_logs(&self, dbname: String) -> Result<(), InspectorError> {
        let api = self.database(&dbname).await?;

        let mut streams = self.inner.streams.lock();
        if streams.contains_key(&dbname) {
            return Err(InspectorError::AlreadySubscribed(dbname));
        }

        let stream = Arc::new(LogStream::start(
            &self.inner.ring_buffer,
            PanelSink {
                messenger: self.inner.messenger.clone(),
                dbname: dbname.clone(),
            },
        ));
        let listener = {
            let stream = stream.clone();
            Arc::new(move |entry: LogEntry| stream.push(entry))
        };
        // A failed page subscription drops the stream, which stops it
        let page = api.subscribe_logs(&dbname, listener)?;

        tracing::debug!(%dbname, "Streaming logs");
        streams.insert(dbname, ActiveStream { stream, page });
        Ok(())
    }

    fn unsubscribe_logs(&self, dbname: &str) {
        let removed = self.inner.streams.lock().remove(dbname);
        match removed {
            Some(active) => {
                active.page.cancel();
                active.stream.destroy();
                tracing::debug!(%dbname, "Stopped streaming logs");
            }
            None => tracing::debug!(%dbname, "No log stream to stop"),
        }
    }
}

impl std::fmt::Debug for ContentScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentScript")
            .field("messenger", &self.inner.messenger)
            .field("log_streams", &self.log_streams())
            .finish_non_exhaustive()
    }
}

/// Delivers log batches of one database to the panel.
struct PanelSink {
    messenger: Messenger,
    dbname: String,
}

#[async_trait]
impl BatchSink for PanelSink {
    async fn send_batch(&self, entries: Vec<LogEntry>) -> Result<(), ChannelError> {
        LOG_BATCH
            .send(
                &self.messenger,
                LogBatch {
                    dbname: self.dbname.clone(),
                    entries,
                },
            )
            .await
    }
}
