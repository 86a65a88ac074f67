//! The coordinator that routes requests between contexts.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    ChannelError, ChannelRegistry, ContextId, HandlerTable, Inbox, Lookup, MailboxSender,
    MessageKind, Messenger, Passthrough, PortEnd, Role, Transport, WireMessage, handler::invoke,
    mailbox, port,
};

#[derive(Default)]
struct RouterInner {
    registry: Mutex<ChannelRegistry>,
    handlers: Arc<HandlerTable>,
    peers: Mutex<HashMap<ContextId, Arc<dyn Transport>>>,
    tabs: Mutex<Option<Passthrough>>,
}

/// The coordinator's dispatcher.
///
/// Exactly one router exists, owned by the background context's startup
/// code. Every other context sends its requests here; the router answers
/// them with a local handler or forwards them to the context that
/// registered the channel. Every request it receives yields exactly one
/// response.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a router with no handlers and no connected contexts.
    pub fn new() -> Self {
        Self::default()
    }

    /// The background context's own messenger. Handlers registered through
    /// it are local to the router and never announced.
    pub fn messenger(&self) -> Messenger {
        Messenger::new(
            Role::Coordinator,
            ContextId::Background,
            self.inner.handlers.clone(),
            Arc::new(crate::Direct(self.inbox(ContextId::Background))),
        )
    }

    /// The inbound side of the router as seen from `origin`. Frames received
    /// through it are attributed to that context.
    pub fn inbox(&self, origin: ContextId) -> RouterInbox {
        RouterInbox {
            router: self.clone(),
            origin,
        }
    }

    /// Reach `context` through `transport` when forwarding requests for the
    /// channels it registers.
    pub fn connect(&self, context: ContextId, transport: Arc<dyn Transport>) {
        tracing::debug!(%context, "Connected context");
        self.inner.peers.lock().insert(context, transport);
    }

    /// Accept a long-lived port from `context`, as `runtime.onConnect`
    /// would. The returned end belongs to the connecting context.
    pub fn open_port(&self, context: ContextId, capacity: usize) -> PortEnd {
        let (local, remote) = port(capacity);
        let local = local.connect(Arc::new(self.inbox(context)));
        self.connect(context, Arc::new(local));
        remote
    }

    /// Serve one-shot messages sent by `context`, as `runtime.onMessage`
    /// would. The returned sender is that context's uplink.
    pub fn open_mailbox(&self, context: ContextId, capacity: usize) -> MailboxSender {
        let (sender, receiver) = mailbox(capacity);
        receiver.spawn(Arc::new(self.inbox(context)));
        sender
    }

    /// Forget `context`: its transport is dropped and the channels it owned
    /// become canceled.
    pub fn disconnect(&self, context: ContextId) {
        self.inner.peers.lock().remove(&context);
        let evicted = self.inner.registry.lock().evict(context);
        tracing::debug!(%context, channels = ?evicted, "Disconnected context");
    }

    /// Route requests for channels owned by tab-scoped contexts through
    /// `passthrough`.
    pub fn attach_tabs(&self, passthrough: Passthrough) {
        *self.inner.tabs.lock() = Some(passthrough);
    }

    /// Channels with a handler anywhere, local ones included, sorted.
    pub fn handled_channels(&self) -> Vec<String> {
        let mut channels = self.inner.registry.lock().handled_channels();
        channels.extend(self.inner.handlers.channels());
        channels.sort();
        channels.dedup();
        channels
    }

    /// Channels whose handler was explicitly unregistered and not replaced.
    pub fn canceled_channels(&self) -> Vec<String> {
        let handled = self.handled_channels();
        let mut channels = self.inner.registry.lock().canceled_channels();
        channels.extend(
            self.inner
                .handlers
                .canceled_channels()
                .into_iter()
                .filter(|channel| !handled.contains(channel)),
        );
        channels.sort();
        channels.dedup();
        channels
    }

    /// Process one inbound frame from `origin`.
    pub async fn dispatch(&self, message: WireMessage, origin: ContextId) -> Option<WireMessage> {
        if let Err(error) = message.validate() {
            tracing::warn!(%origin, channel = %message.channel, %error, "Received malformed frame");
            return (message.kind == MessageKind::Request)
                .then(|| message.fail(ChannelError::from(error).to_string()));
        }

        match message.kind {
            MessageKind::Register => {
                let previous = self
                    .inner
                    .registry
                    .lock()
                    .register(&message.channel, origin);
                if let Some(previous) = previous.filter(|previous| *previous != origin) {
                    tracing::debug!(
                        channel = %message.channel,
                        %previous,
                        context = %origin,
                        "Channel moved to another context"
                    );
                } else {
                    tracing::debug!(channel = %message.channel, context = %origin, "Channel registered");
                }
                None
            }
            MessageKind::Unregister => {
                if self
                    .inner
                    .registry
                    .lock()
                    .unregister(&message.channel, origin)
                {
                    tracing::debug!(channel = %message.channel, context = %origin, "Channel unregistered");
                } else {
                    tracing::debug!(
                        channel = %message.channel,
                        context = %origin,
                        "Ignoring unregister from a context that no longer owns the channel"
                    );
                }
                None
            }
            MessageKind::Response => {
                tracing::trace!(
                    channel = %message.channel,
                    context = %origin,
                    "Dropping unsolicited response"
                );
                None
            }
            MessageKind::Request => Some(self.route(&message, origin).await),
        }
    }

    async fn route(&self, request: &WireMessage, origin: ContextId) -> WireMessage {
        let channel = request.channel.as_str();

        tracing::trace!(
            channel,
            context = %origin,
            correlation_id = ?request.correlation_id.as_ref().map(|id| id.as_str()),
            "Routing request"
        );

        if let Some(handler) = self.inner.handlers.get(channel) {
            let payload = request.payload.clone().unwrap_or(Value::Null);
            return request.respond(invoke(handler, payload).await);
        }

        let lookup = self.inner.registry.lock().lookup(channel);
        match lookup {
            Lookup::Owned(owner) => self.forward(request, owner).await,
            Lookup::Canceled => request.fail(
                ChannelError::HandlerCanceled {
                    channel: channel.to_string(),
                }
                .to_string(),
            ),
            Lookup::Unknown if self.inner.handlers.is_canceled(channel) => request.fail(
                ChannelError::HandlerCanceled {
                    channel: channel.to_string(),
                }
                .to_string(),
            ),
            Lookup::Unknown => request.fail(
                ChannelError::NoHandlerRegistered {
                    channel: channel.to_string(),
                }
                .to_string(),
            ),
        }
    }

    async fn forward(&self, request: &WireMessage, owner: ContextId) -> WireMessage {
        tracing::debug!(channel = %request.channel, context = %owner, "Forwarding request");

        if owner.is_tab_scoped() {
            let tabs = self.inner.tabs.lock().clone();
            return match tabs {
                Some(passthrough) => passthrough.forward(request).await,
                None => request.fail(
                    ChannelError::TransportUnavailable(format!(
                        "no tab forwarder attached to reach {owner}"
                    ))
                    .to_string(),
                ),
            };
        }

        let peer = self.inner.peers.lock().get(&owner).cloned();
        let Some(peer) = peer else {
            return request.fail(
                ChannelError::TransportUnavailable(format!("no transport connected for {owner}"))
                    .to_string(),
            );
        };

        match peer.send(request.clone()).await {
            Ok(Some(response)) => response.answering(request),
            Ok(None) => request.fail(
                ChannelError::NoResponse {
                    channel: request.channel.clone(),
                }
                .to_string(),
            ),
            Err(error) => {
                tracing::warn!(channel = %request.channel, context = %owner, %error, "Forwarding failed");
                request.fail(ChannelError::from(error).to_string())
            }
        }
    }

    /// Tear the router down: every handler, registration, connected
    /// transport and the tab forwarder are dropped.
    pub fn shutdown(&self) {
        self.inner.handlers.clear();
        self.inner.registry.lock().clear();
        self.inner.peers.lock().clear();
        self.inner.tabs.lock().take();
        tracing::debug!("Router shut down");
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("handled", &self.handled_channels())
            .field("peers", &self.inner.peers.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The router's inbound side for one context, see [Router::inbox].
#[derive(Debug, Clone)]
pub struct RouterInbox {
    router: Router,
    origin: ContextId,
}

impl RouterInbox {
    /// The context frames are attributed to.
    pub fn origin(&self) -> ContextId {
        self.origin
    }
}

#[async_trait]
impl Inbox for RouterInbox {
    async fn receive(&self, message: WireMessage) -> Option<WireMessage> {
        self.router.dispatch(message, self.origin).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direct, TransportError, handler::boxed};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use testresult::TestResult;

    fn satellite(router: &Router, context: ContextId) -> Messenger {
        let messenger = Messenger::satellite(context, Direct(router.inbox(context)));
        router.connect(context, Arc::new(Direct(messenger.inbox())));
        messenger
    }

    #[tokio::test]
    async fn it_answers_with_a_local_handler() -> TestResult {
        let router = Router::new();
        let background = router.messenger();
        background
            .register("echo", boxed(|payload| async move { Ok(payload) }))
            .await?;

        let panel = satellite(&router, ContextId::Panel);
        assert_eq!(panel.request("echo", json!({ "n": 1 })).await?, json!({ "n": 1 }));
        Ok(())
    }

    #[tokio::test]
    async fn it_tells_canceled_channels_from_unknown_ones() -> TestResult {
        let router = Router::new();
        let background = router.messenger();
        background
            .register("exec-sql", boxed(|_| async move { Ok(Value::Null) }))
            .await?;
        background.unregister("exec-sql").await?;

        let panel = satellite(&router, ContextId::Panel);
        let canceled = panel.request("exec-sql", Value::Null).await;
        let unknown = panel.request("query-sql", Value::Null).await;

        assert_eq!(
            canceled,
            Err(ChannelError::Rejected(
                ChannelError::HandlerCanceled {
                    channel: "exec-sql".into()
                }
                .to_string()
            ))
        );
        assert_eq!(
            unknown,
            Err(ChannelError::Rejected(
                ChannelError::NoHandlerRegistered {
                    channel: "query-sql".into()
                }
                .to_string()
            ))
        );
        assert_eq!(router.canceled_channels(), vec!["exec-sql".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn it_forwards_to_the_registering_context() -> TestResult {
        let router = Router::new();
        let offscreen = satellite(&router, ContextId::Offscreen);
        offscreen
            .register(
                "opfs:list",
                boxed(|_| async move { Ok(json!(["app.db", "app.db-wal"])) }),
            )
            .await?;

        let panel = satellite(&router, ContextId::Panel);
        assert_eq!(
            panel.request("opfs:list", Value::Null).await?,
            json!(["app.db", "app.db-wal"])
        );
        assert_eq!(router.handled_channels(), vec!["opfs:list".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn it_cancels_remote_channels_on_unregister() -> TestResult {
        let router = Router::new();
        let offscreen = satellite(&router, ContextId::Offscreen);
        offscreen
            .register("opfs:list", boxed(|_| async move { Ok(Value::Null) }))
            .await?;
        offscreen.unregister("opfs:list").await?;

        let panel = satellite(&router, ContextId::Panel);
        let outcome = panel.request("opfs:list", Value::Null).await;

        let Err(ChannelError::Rejected(message)) = outcome else {
            panic!("expected a rejection, got {outcome:?}");
        };
        assert!(message.contains("was unregistered"));
        Ok(())
    }

    #[tokio::test]
    async fn it_ignores_stale_unregisters_from_a_previous_owner() -> TestResult {
        let router = Router::new();
        router
            .dispatch(WireMessage::register("heartbeat"), ContextId::Offscreen)
            .await;
        router
            .dispatch(WireMessage::register("heartbeat"), ContextId::Panel)
            .await;
        router
            .dispatch(WireMessage::unregister("heartbeat"), ContextId::Offscreen)
            .await;

        assert_eq!(router.handled_channels(), vec!["heartbeat".to_string()]);
        assert!(router.canceled_channels().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn it_answers_exactly_once_when_a_handler_fails() -> TestResult {
        let router = Router::new();
        let background = router.messenger();
        background
            .register(
                "explode",
                boxed(|_| async move { Err("boom".to_string()) }),
            )
            .await?;

        let response = router
            .dispatch(
                WireMessage::request("explode", "1".into(), Value::Null),
                ContextId::Panel,
            )
            .await
            .ok_or("no response")?;

        assert_eq!(response.success, Some(false));
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert_eq!(response.correlation_id, Some("1".into()));
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_a_missing_peer_transport() -> TestResult {
        let router = Router::new();
        router
            .dispatch(WireMessage::register("opfs:list"), ContextId::Offscreen)
            .await;

        let outcome = router
            .messenger()
            .request("opfs:list", Value::Null)
            .await;

        let Err(ChannelError::Rejected(message)) = outcome else {
            panic!("expected a rejection, got {outcome:?}");
        };
        assert!(message.starts_with("Transport unavailable"));
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_torn_down_peers_as_unavailable() -> TestResult {
        let router = Router::new();
        let (sender, receiver) = mailbox(1);
        drop(receiver);
        router.connect(ContextId::Offscreen, Arc::new(sender));
        router
            .dispatch(WireMessage::register("opfs:list"), ContextId::Offscreen)
            .await;

        let outcome = router.messenger().request("opfs:list", Value::Null).await;

        assert_eq!(
            outcome,
            Err(ChannelError::Rejected(
                ChannelError::from(TransportError::Closed).to_string()
            ))
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_keeps_concurrent_calls_apart() -> TestResult {
        let router = Router::new();
        let background = router.messenger();
        background
            .register(
                "sleepy",
                boxed(|payload| async move {
                    let delay = payload["delay"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(payload)
                }),
            )
            .await?;

        let panel = Messenger::over_port(ContextId::Panel, router.open_port(ContextId::Panel, 8));
        let (slow, fast) = tokio::join!(
            panel.request("sleepy", json!({ "delay": 30, "tag": "slow" })),
            panel.request("sleepy", json!({ "delay": 0, "tag": "fast" })),
        );

        assert_eq!(slow?["tag"], json!("slow"));
        assert_eq!(fast?["tag"], json!("fast"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn it_routes_to_a_port_registration_as_soon_as_it_returns() -> TestResult {
        let router = Router::new();
        let background = router.messenger();

        for n in 0..200 {
            let panel =
                Messenger::over_port(ContextId::Panel, router.open_port(ContextId::Panel, 8));
            let channel = format!("ch{n}");
            panel
                .register(&channel, boxed(|payload| async move { Ok(payload) }))
                .await?;

            assert_eq!(background.request(&channel, json!(n)).await?, json!(n));

            panel.unregister(&channel).await?;
            let outcome = background.request(&channel, Value::Null).await;
            assert_eq!(
                outcome,
                Err(ChannelError::Rejected(
                    ChannelError::HandlerCanceled { channel }.to_string()
                ))
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn it_forgets_everything_on_shutdown() -> TestResult {
        let router = Router::new();
        let background = router.messenger();
        background
            .register("echo", boxed(|payload| async move { Ok(payload) }))
            .await?;
        let _offscreen = satellite(&router, ContextId::Offscreen);
        router
            .dispatch(WireMessage::register("opfs:list"), ContextId::Offscreen)
            .await;

        router.shutdown();

        assert!(router.handled_channels().is_empty());
        assert!(router.canceled_channels().is_empty());
        let outcome = background.request("echo", Value::Null).await;
        assert!(matches!(outcome, Err(ChannelError::Rejected(message)) if message.contains("No handler registered")));
        Ok(())
    }

    #[tokio::test]
    async fn it_cancels_the_channels_of_a_disconnected_context() -> TestResult {
        let router = Router::new();
        let offscreen = satellite(&router, ContextId::Offscreen);
        offscreen
            .register("opfs:list", boxed(|_| async move { Ok(Value::Null) }))
            .await?;

        router.disconnect(ContextId::Offscreen);

        assert!(router.handled_channels().is_empty());
        assert_eq!(router.canceled_channels(), vec!["opfs:list".to_string()]);
        Ok(())
    }
}
