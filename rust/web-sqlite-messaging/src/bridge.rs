//! Fire-and-forget messaging between the two worlds of one page.
//!
//! A content script runs in an ISOLATED world while the page (and the
//! `window.__web_sqlite` API) lives in the MAIN world. The only thing the
//! two share is the window's `postMessage` bus, modelled here by
//! [PageBus]. [WorldBridge] layers typed pub/sub on top of it: no
//! correlation, no responses, any number of listeners per type.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

/// Tag carried by every bridge envelope so that unrelated page traffic on
/// the same bus is ignored.
pub const BRIDGE_NAMESPACE: &str = "web-sqlite-devtools";

/// Identity of a window (top-level page or frame) posting on a [PageBus].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// One `postMessage` event as observed by a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    /// The window that posted the message.
    pub source: WindowId,
    /// The posted data.
    pub data: Value,
}

/// The `postMessage` bus shared by every world and frame of one page.
#[derive(Debug, Clone)]
pub struct PageBus {
    sender: broadcast::Sender<PostedMessage>,
}

impl PageBus {
    /// Create a bus buffering up to `capacity` messages per lagging listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// A handle for posting as `id`.
    pub fn window(&self, id: WindowId) -> Window {
        Window {
            id,
            sender: self.sender.clone(),
        }
    }
}

/// A window's view of its [PageBus].
#[derive(Debug, Clone)]
pub struct Window {
    id: WindowId,
    sender: broadcast::Sender<PostedMessage>,
}

impl Window {
    /// This window's identity.
    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Post `data` to every listener on the page. Returns how many
    /// listeners were attached.
    pub fn post(&self, data: Value) -> usize {
        self.sender
            .send(PostedMessage {
                source: self.id,
                data,
            })
            .unwrap_or(0)
    }

    /// Start observing messages posted on the page from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PostedMessage> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    namespace: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next: AtomicU64,
    by_type: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
}

/// Typed pub/sub between the MAIN and ISOLATED worlds of one window.
#[derive(Clone)]
pub struct WorldBridge {
    window: Window,
    listeners: Arc<Listeners>,
}

impl WorldBridge {
    /// Bridge the worlds of `window`.
    pub fn new(window: Window) -> Self {
        Self {
            window,
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Broadcast `data` under `kind` to the other world.
    pub fn send(&self, kind: &str, data: Value) {
        let envelope = serde_json::json!({
            "namespace": BRIDGE_NAMESPACE,
            "type": kind,
            "data": data,
        });
        let receivers = self.window.post(envelope);
        tracing::trace!(kind, receivers, "Posted bridge message");
    }

    /// Call `listener` with the data of every message of type `kind`.
    pub fn listen<F>(&self, kind: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.listeners.next.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .by_type
            .lock()
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(listener)));

        ListenerHandle {
            listeners: self.listeners.clone(),
            kind: kind.to_string(),
            id,
        }
    }

    /// Deliver one observed message to the matching listeners, returning how
    /// many were called. Messages from other windows and payloads that are
    /// not bridge envelopes are skipped.
    pub fn dispatch(&self, message: &PostedMessage) -> usize {
        if message.source != self.window.id {
            tracing::trace!(source = %message.source, "Ignoring message from another window");
            return 0;
        }

        let ours = message
            .data
            .get("namespace")
            .and_then(Value::as_str)
            .is_some_and(|namespace| namespace == BRIDGE_NAMESPACE);
        if !ours {
            return 0;
        }

        let envelope = match Envelope::deserialize(&message.data) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(%error, "Dropping malformed bridge message");
                return 0;
            }
        };

        let listeners: Vec<Listener> = self
            .listeners
            .by_type
            .lock()
            .get(&envelope.kind)
            .map(|entries| entries.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener(&envelope.data);
        }
        listeners.len()
    }

    /// Observe the window on a new task, dispatching every message until
    /// the bus closes or the task is aborted.
    pub fn spawn(&self) -> JoinHandle<()> {
        let mut receiver = self.window.subscribe();
        let bridge = self.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        bridge.dispatch(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Bridge fell behind; messages were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for WorldBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldBridge")
            .field("window", &self.window.id)
            .finish_non_exhaustive()
    }
}

/// A registered bridge listener; see [WorldBridge::listen].
#[derive(Clone)]
pub struct ListenerHandle {
    listeners: Arc<Listeners>,
    kind: String,
    id: u64,
}

impl ListenerHandle {
    /// Stop receiving messages. Returns whether the listener was still
    /// attached.
    pub fn remove(&self) -> bool {
        let mut by_type = self.listeners.by_type.lock();
        let Some(entries) = by_type.get_mut(&self.kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != self.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            by_type.remove(&self.kind);
        }
        removed
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}
