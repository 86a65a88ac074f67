//! Relaying coordinator requests on to the inspected tab.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    BoxedHandler, ChannelError, CorrelationIds, Messenger, TabMessenger, TransportError,
    WireMessage, handler::boxed,
};

/// Forwards requests verbatim to the content script of the active tab.
///
/// This is the second hop of `panel -> background -> content script`: the
/// background resolves the tab being inspected, re-issues the request there
/// under the same channel name and hands back whatever the content script
/// answered. Failures (no tab, no content script, a failing handler) always
/// come back as an error, never as a hang.
#[derive(Clone)]
pub struct Passthrough {
    tabs: Arc<dyn TabMessenger>,
    ids: Arc<CorrelationIds>,
}

impl Passthrough {
    /// Forward through the host's tab messaging primitive.
    pub fn new<T>(tabs: T) -> Self
    where
        T: TabMessenger + 'static,
    {
        Self {
            tabs: Arc::new(tabs),
            ids: Arc::new(CorrelationIds::default()),
        }
    }

    /// Send `payload` on `channel` to the active tab and await its outcome.
    pub async fn relay(&self, channel: &str, payload: Value) -> Result<Value, ChannelError> {
        let tab = self
            .tabs
            .active_tab()
            .await?
            .ok_or(TransportError::NoActiveTab)?;

        let id = self.ids.next();
        tracing::debug!(channel, %tab, correlation_id = %id, "Relaying to content script");

        let response = self
            .tabs
            .send_to_tab(tab, WireMessage::request(channel, id.clone(), payload))
            .await
            .inspect_err(|error| {
                tracing::warn!(channel, %tab, %error, "Tab delivery failed");
            })?
            .ok_or_else(|| ChannelError::NoResponse {
                channel: channel.to_string(),
            })?;

        if response.correlation_id.as_ref() != Some(&id) {
            return Err(ChannelError::Protocol(format!(
                "content script answered {:?} on channel \"{channel}\", expected {id}",
                response.correlation_id.as_ref().map(|id| id.as_str())
            )));
        }

        response.into_outcome()
    }

    /// Answer `request` by relaying it to the active tab.
    pub async fn forward(&self, request: &WireMessage) -> WireMessage {
        let payload = request.payload.clone().unwrap_or(Value::Null);
        let outcome = self
            .relay(&request.channel, payload)
            .await
            .map_err(|error| error.to_string());
        request.respond(outcome)
    }

    /// A handler that relays every request on `channel`.
    pub fn handler(&self, channel: &str) -> BoxedHandler {
        let passthrough = self.clone();
        let channel = channel.to_string();
        boxed(move |payload| {
            let passthrough = passthrough.clone();
            let channel = channel.clone();
            async move {
                passthrough
                    .relay(&channel, payload)
                    .await
                    .map_err(|error| error.to_string())
            }
        })
    }

    /// Register a relaying handler for each of `channels` on `messenger`.
    pub async fn install(&self, messenger: &Messenger, channels: &[&str]) -> Result<(), ChannelError> {
        for channel in channels {
            messenger.register(channel, self.handler(channel)).await?;
        }
        tracing::debug!(count = channels.len(), "Installed passthrough handlers");
        Ok(())
    }
}

impl std::fmt::Debug for Passthrough {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passthrough").finish_non_exhaustive()
    }
}
