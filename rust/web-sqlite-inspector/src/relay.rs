//! Database change notifications, from the page to the panel.
//!
//! The MAIN world subscribes to the page API and posts the database list
//! across the [WorldBridge]; the ISOLATED world picks it up and sends it on
//! as a `databases:changed` request.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use web_sqlite_messaging::{
    DATABASES_CHANGED, DatabasesChanged, ListenerHandle, Messenger, WorldBridge,
};

use crate::{ApiError, PageSubscription, WebSqliteApi};

/// Bridge message type carrying the current database list.
pub const DATABASES_CHANGED_MESSAGE: &str = "databases-changed";

/// In the MAIN world: post the database list across `bridge` every time
/// the page opens or closes a database.
pub fn relay_changes(
    api: &dyn WebSqliteApi,
    bridge: WorldBridge,
) -> Result<PageSubscription, ApiError> {
    api.subscribe_changes(Arc::new(move |databases: Vec<String>| {
        tracing::debug!(count = databases.len(), "Databases changed");
        bridge.send(DATABASES_CHANGED_MESSAGE, json!({ "databases": databases }));
    }))
}

/// In the ISOLATED world: send every database list arriving over `bridge`
/// to whoever handles `databases:changed`.
pub fn forward_changes(bridge: &WorldBridge, messenger: Messenger) -> ListenerHandle {
    bridge.listen(DATABASES_CHANGED_MESSAGE, move |data| {
        let changed = match DatabasesChanged::deserialize(data) {
            Ok(changed) => changed,
            Err(error) => {
                tracing::warn!(%error, "Ignoring malformed database list");
                return;
            }
        };

        let messenger = messenger.clone();
        tokio::spawn(async move {
            // The panel is often closed, so an unanswered notice is routine
            if let Err(error) = DATABASES_CHANGED.send(&messenger, changed).await {
                tracing::debug!(%error, "Database changes were not delivered");
            }
        });
    })
}
