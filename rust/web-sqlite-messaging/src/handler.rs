//! Per-context handler tables and the invocation of a single handler.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{ChannelError, Inbox, MessageKind, WireMessage};

/// The future produced by an erased handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, String>>;

/// A channel handler with its payload types erased to JSON.
pub type BoxedHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
struct Entries {
    handlers: HashMap<String, BoxedHandler>,
    canceled: HashSet<String>,
}

/// The handlers registered in one execution context.
///
/// A channel name maps to at most one handler; removing a handler leaves a
/// canceled mark behind so that later requests can be told apart from
/// requests for a channel that never existed.
#[derive(Default)]
pub struct HandlerTable {
    entries: Mutex<Entries>,
}

impl HandlerTable {
    /// Register `handler` as the exclusive processor of `channel`.
    pub fn insert(&self, channel: &str, handler: BoxedHandler) -> Result<(), ChannelError> {
        let mut entries = self.entries.lock();
        if entries.handlers.contains_key(channel) {
            return Err(ChannelError::DuplicateHandler {
                channel: channel.to_string(),
            });
        }
        entries.canceled.remove(channel);
        entries.handlers.insert(channel.to_string(), handler);
        Ok(())
    }

    /// Remove the handler of `channel` and mark it canceled. Returns whether
    /// a handler was present.
    pub fn remove(&self, channel: &str) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.handlers.remove(channel).is_some();
        if removed {
            entries.canceled.insert(channel.to_string());
        }
        removed
    }

    /// Drop the handler of `channel` without leaving a canceled mark, used
    /// to roll back a registration that never completed.
    pub(crate) fn discard(&self, channel: &str) {
        self.entries.lock().handlers.remove(channel);
    }

    /// Look up the handler of `channel`.
    pub fn get(&self, channel: &str) -> Option<BoxedHandler> {
        self.entries.lock().handlers.get(channel).cloned()
    }

    /// Whether a handler is registered for `channel`.
    pub fn contains(&self, channel: &str) -> bool {
        self.entries.lock().handlers.contains_key(channel)
    }

    /// Whether `channel` had its handler explicitly removed.
    pub fn is_canceled(&self, channel: &str) -> bool {
        self.entries.lock().canceled.contains(channel)
    }

    /// Names of every registered channel, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.entries.lock().handlers.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Names of every canceled channel, sorted.
    pub fn canceled_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.entries.lock().canceled.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Remove every handler and canceled mark.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.handlers.clear();
        entries.canceled.clear();
    }

    /// Answer a request using only this table. Every request yields exactly
    /// one response; frames of any other kind yield none.
    pub async fn answer(&self, request: &WireMessage) -> Option<WireMessage> {
        if request.kind != MessageKind::Request {
            return None;
        }

        let channel = request.channel.as_str();
        let Some(handler) = self.get(channel) else {
            let error = if self.is_canceled(channel) {
                ChannelError::HandlerCanceled {
                    channel: channel.to_string(),
                }
            } else {
                ChannelError::NoHandlerRegistered {
                    channel: channel.to_string(),
                }
            };
            return Some(request.fail(error.to_string()));
        };

        let payload = request.payload.clone().unwrap_or(Value::Null);
        Some(request.respond(invoke(handler, payload).await))
    }
}

#[async_trait]
impl Inbox for HandlerTable {
    async fn receive(&self, message: WireMessage) -> Option<WireMessage> {
        self.answer(&message).await
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("channels", &self.channels())
            .finish()
    }
}

/// Erase a JSON-level handler closure.
pub fn boxed<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(move |payload| handler(payload).boxed())
}

/// Run `handler`, turning a panic into an error so that the caller always
/// gets an outcome.
pub async fn invoke(handler: BoxedHandler, payload: Value) -> Result<Value, String> {
    match AssertUnwindSafe(async move { handler(payload).await })
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(panic_message(panic)),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
