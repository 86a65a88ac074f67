//! A context's endpoint: local handlers plus an uplink to the coordinator.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    BoxedHandler, ChannelError, ContextId, CorrelationIds, HandlerTable, PortEnd, Role,
    Transport, WireMessage,
};

struct Inner {
    role: Role,
    context: ContextId,
    handlers: Arc<HandlerTable>,
    uplink: Arc<dyn Transport>,
    ids: CorrelationIds,
}

/// One execution context's endpoint into the messaging system.
///
/// A messenger owns the handlers registered in its context and the
/// transport through which it reaches the coordinator. Satellites are built
/// with [Messenger::satellite]; the coordinator's messenger comes from
/// [crate::Router::messenger].
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

impl Messenger {
    /// Create the messenger of a non-coordinator context, reaching the
    /// coordinator through `uplink`.
    pub fn satellite<T>(context: ContextId, uplink: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::new(
            Role::Satellite,
            context,
            Arc::new(HandlerTable::default()),
            Arc::new(uplink),
        )
    }

    /// Create the messenger of a non-coordinator context that talks to the
    /// coordinator over a long-lived port. Requests the coordinator forwards
    /// through the port are answered by this messenger's handlers.
    pub fn over_port(context: ContextId, end: PortEnd) -> Self {
        let handlers = Arc::new(HandlerTable::default());
        let port = end.connect(handlers.clone());
        Self::new(Role::Satellite, context, handlers, Arc::new(port))
    }

    pub(crate) fn new(
        role: Role,
        context: ContextId,
        handlers: Arc<HandlerTable>,
        uplink: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                role,
                context,
                handlers,
                uplink,
                ids: CorrelationIds::default(),
            }),
        }
    }

    /// The role this context plays.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The context this messenger belongs to.
    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    /// The handlers registered in this context. Serve this as the context's
    /// [crate::Inbox] so that the coordinator can forward requests here.
    pub fn inbox(&self) -> Arc<HandlerTable> {
        self.inner.handlers.clone()
    }

    /// Names of the channels handled in this context.
    pub fn local_channels(&self) -> Vec<String> {
        self.inner.handlers.channels()
    }

    /// Send a JSON request on `channel` and await its outcome.
    pub async fn request(&self, channel: &str, payload: Value) -> Result<Value, ChannelError> {
        let id = self.inner.ids.next();
        let request = WireMessage::request(channel, id.clone(), payload);

        tracing::trace!(
            context = %self.inner.context,
            channel,
            correlation_id = %id,
            "Sending request"
        );

        let response = self
            .inner
            .uplink
            .send(request)
            .await
            .inspect_err(|error| {
                tracing::warn!(context = %self.inner.context, channel, %error, "Transport failed");
            })?
            .ok_or_else(|| ChannelError::NoResponse {
                channel: channel.to_string(),
            })?;

        if response.correlation_id.as_ref() != Some(&id) {
            return Err(ChannelError::Protocol(format!(
                "response on channel \"{channel}\" answers {:?}, expected {id}",
                response.correlation_id.as_ref().map(|id| id.as_str())
            )));
        }

        response.into_outcome()
    }

    /// Make `handler` the exclusive processor of `channel` in this context.
    ///
    /// A satellite also announces the registration to the coordinator; if
    /// that announcement cannot be delivered the registration is rolled
    /// back.
    pub async fn register(&self, channel: &str, handler: BoxedHandler) -> Result<(), ChannelError> {
        self.inner.handlers.insert(channel, handler)?;

        if self.inner.role == Role::Satellite
            && let Err(error) = self.inner.uplink.send(WireMessage::register(channel)).await
        {
            self.inner.handlers.discard(channel);
            return Err(error.into());
        }

        tracing::debug!(context = %self.inner.context, channel, "Registered handler");
        Ok(())
    }

    /// Remove the handler of `channel`, marking it canceled. Returns whether
    /// a handler was registered.
    pub async fn unregister(&self, channel: &str) -> Result<bool, ChannelError> {
        if !self.inner.handlers.remove(channel) {
            return Ok(false);
        }

        tracing::debug!(context = %self.inner.context, channel, "Unregistered handler");

        if self.inner.role == Role::Satellite {
            self.inner
                .uplink
                .send(WireMessage::unregister(channel))
                .await?;
        }
        Ok(true)
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("role", &self.inner.role)
            .field("context", &self.inner.context)
            .field("handlers", &self.inner.handlers)
            .finish_non_exhaustive()
    }
}
