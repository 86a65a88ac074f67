//! Full extension wiring: panel over a port, content script over the tab
//! messenger and a mailbox, page API across the world bridge.

#![cfg(feature = "helpers")]

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::json;
use testresult::TestResult;
use tokio::sync::mpsc;
use web_sqlite_inspector::{
    Background, ContentScript, InspectorError, MemoryWebSqlite, PageSubscription, PanelClient,
    TabHost, forward_changes, relay_changes,
};
use web_sqlite_messaging::{
    ChannelError, ContextId, EXEC_SQL, ListenerHandle, MessagingConfig, Messenger, NO_ACTIVE_TAB,
    PageBus, QueryResult, Router, SqlRequest, TabId, WindowId, WorldBridge,
};

struct Extension {
    background: Background,
    tabs: TabHost,
    api: Arc<MemoryWebSqlite>,
    script: ContentScript,
    _changes: (PageSubscription, ListenerHandle, tokio::task::JoinHandle<()>),
}

async fn extension(config: MessagingConfig) -> Result<Extension, InspectorError> {
    let tabs = TabHost::default();
    let background = Background::start(config, tabs.clone()).await?;

    let api = Arc::new(MemoryWebSqlite::default());
    api.open_database("app.db");

    let content = Messenger::satellite(ContextId::ContentIsolated, background.content_uplink());
    let script = ContentScript::install(content.clone(), api.clone(), background.config()).await?;
    tabs.attach(TabId(1), content.inbox());
    tabs.activate(TabId(1));

    let bus = PageBus::new(32);
    let main = WorldBridge::new(bus.window(WindowId(1)));
    let isolated = WorldBridge::new(bus.window(WindowId(1)));
    let pump = isolated.spawn();
    let forwarding = forward_changes(&isolated, content);
    let relaying = relay_changes(api.as_ref(), main)?;

    Ok(Extension {
        background,
        tabs,
        api,
        script,
        _changes: (relaying, forwarding, pump),
    })
}

#[tokio::test]
async fn it_runs_sql_from_the_panel() -> TestResult {
    let extension = extension(MessagingConfig::default()).await?;
    extension.api.answer_query(
        "app.db",
        "SELECT name FROM users",
        QueryResult {
            columns: vec!["name".into()],
            rows: vec![json!({ "name": "ada" }), json!({ "name": "grace" })],
        },
    );
    extension
        .api
        .fail_statement("app.db", "SELEC 1", "near \"SELEC\": syntax error");

    let panel = PanelClient::connect(extension.background.connect_panel());

    let result = panel.query("app.db", "SELECT name FROM users", None).await?;
    assert_eq!(result.rows.len(), 2);

    assert_eq!(
        panel.exec("app.db", "SELEC 1", None).await,
        Err(ChannelError::Rejected("near \"SELEC\": syntax error".into()))
    );
    assert_eq!(
        panel.tables("nope.db").await,
        Err(ChannelError::Rejected("Database \"nope.db\" not found".into()))
    );
    Ok(())
}

#[tokio::test]
async fn it_answers_concurrent_panel_requests_independently() -> TestResult {
    let extension = extension(MessagingConfig::default()).await?;
    extension.api.open_database("cache.db");
    let panel = PanelClient::connect(extension.background.connect_panel());

    let (databases, app, cache) = tokio::join!(
        panel.databases(),
        panel.tables("app.db"),
        panel.tables("missing.db"),
    );

    assert_eq!(databases?, vec!["app.db".to_string(), "cache.db".to_string()]);
    assert_eq!(app?, Vec::<String>::new());
    assert!(cache.is_err());
    Ok(())
}

#[tokio::test]
async fn it_fails_cleanly_once_the_tab_goes_away() -> TestResult {
    let extension = extension(MessagingConfig::default()).await?;
    let panel = PanelClient::connect(extension.background.connect_panel());

    assert_eq!(panel.databases().await?, vec!["app.db".to_string()]);

    extension.tabs.deactivate();
    assert_eq!(
        panel.databases().await,
        Err(ChannelError::Rejected(NO_ACTIVE_TAB.into()))
    );

    extension.tabs.activate(TabId(2));
    assert!(panel.databases().await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn it_streams_logs_to_the_panel() -> TestResult {
    let config = MessagingConfig::from_json(
        r#"{ "ringBuffer": { "capacity": 8, "batchSize": 4, "flushIntervalMs": 50 } }"#,
    )?;
    let extension = extension(config).await?;
    let panel = PanelClient::connect(extension.background.connect_panel());

    let (tx, mut batches) = mpsc::unbounded_channel();
    let _batches = panel
        .on_log_batch(move |batch| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(batch);
            }
        })
        .await?;

    panel.subscribe_logs("app.db").await?;
    assert_eq!(extension.script.log_streams(), vec!["app.db".to_string()]);

    for n in 0..6 {
        extension
            .api
            .emit_log("app.db", "info", json!({ "sql": format!("SELECT {n}") }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut delivered = Vec::new();
    while let Ok(batch) = batches.try_recv() {
        assert_eq!(batch.dbname, "app.db");
        assert!(batch.entries.len() <= 4);
        delivered.extend(batch.entries);
    }
    assert_eq!(
        delivered
            .iter()
            .map(|entry| entry.data["sql"].clone())
            .collect::<Vec<_>>(),
        (0..6)
            .map(|n| json!(format!("SELECT {n}")))
            .collect::<Vec<_>>()
    );

    panel.unsubscribe_logs("app.db").await?;
    assert!(extension.script.log_streams().is_empty());
    assert_eq!(extension.api.log_listeners("app.db"), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn it_tells_the_panel_about_new_databases() -> TestResult {
    let extension = extension(MessagingConfig::default()).await?;
    let panel = PanelClient::connect(extension.background.connect_panel());

    let (tx, mut changes) = mpsc::unbounded_channel();
    let _changes = panel
        .on_databases_changed(move |changed| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(changed.databases);
            }
        })
        .await?;

    extension.api.open_database("cache.db");
    assert_eq!(
        changes.recv().await.ok_or("no change delivered")?,
        vec!["app.db".to_string(), "cache.db".to_string()]
    );

    extension.api.close_database("app.db");
    assert_eq!(
        changes.recv().await.ok_or("no change delivered")?,
        vec!["cache.db".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn it_routes_to_content_registrations_without_passthrough_handlers() -> TestResult {
    let router = Router::new();
    let tabs = TabHost::default();
    router.attach_tabs(web_sqlite_messaging::Passthrough::new(tabs.clone()));

    let api = Arc::new(MemoryWebSqlite::default());
    api.open_database("app.db");
    let content = Messenger::satellite(
        ContextId::ContentIsolated,
        router.open_mailbox(ContextId::ContentIsolated, 8),
    );
    let _script =
        ContentScript::install(content.clone(), api.clone(), &MessagingConfig::default()).await?;
    tabs.attach(TabId(4), content.inbox());
    tabs.activate(TabId(4));

    EXEC_SQL
        .send(
            &router.messenger(),
            SqlRequest {
                dbname: "app.db".into(),
                sql: "DELETE FROM users".into(),
                params: None,
            },
        )
        .await?;
    assert_eq!(api.statements("app.db"), vec!["DELETE FROM users".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn it_forgets_the_panel_after_it_disconnects() -> TestResult {
    let extension = extension(MessagingConfig::default()).await?;
    let panel = PanelClient::connect(extension.background.connect_panel());
    let _changes = panel.on_databases_changed(|_| async {}).await?;

    let router = extension.background.router();
    assert!(router.handled_channels().contains(&"databases:changed".to_string()));

    extension.background.disconnect_panel();
    assert!(!router.handled_channels().contains(&"databases:changed".to_string()));
    Ok(())
}
