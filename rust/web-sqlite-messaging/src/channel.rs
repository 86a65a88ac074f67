//! Typed request/response contracts over a [Messenger](crate::Messenger).

use std::{fmt::Display, future::Future, marker::PhantomData};

use serde::{Serialize, de::DeserializeOwned};

use crate::{ChannelError, Messenger, handler};

/// A named, typed request/response contract between two contexts.
///
/// Channels are plain values and are usually declared as constants:
///
/// ```rust
/// use web_sqlite_messaging::Channel;
///
/// const ECHO: Channel<String, String> = Channel::new("echo");
/// assert_eq!(ECHO.name(), "echo");
/// ```
pub struct Channel<Req, Res> {
    name: &'static str,
    types: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> Clone for Channel<Req, Res> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Res> Copy for Channel<Req, Res> {}

impl<Req, Res> std::fmt::Debug for Channel<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Channel").field(&self.name).finish()
    }
}

impl<Req, Res> Channel<Req, Res> {
    /// Define a channel.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            types: PhantomData,
        }
    }

    /// The channel name used on the wire.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<Req, Res> Channel<Req, Res>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Res: Serialize + DeserializeOwned + Send + 'static,
{
    /// Send `payload` from the context of `messenger` and await the typed
    /// response.
    ///
    /// Fails when the handler reports an error, when nothing answers, or
    /// when the transport itself fails.
    pub async fn send(&self, messenger: &Messenger, payload: Req) -> Result<Res, ChannelError> {
        let payload =
            serde_json::to_value(payload).map_err(|error| ChannelError::Encode(error.to_string()))?;
        let response = messenger.request(self.name, payload).await?;
        serde_json::from_value(response).map_err(|error| ChannelError::Decode(error.to_string()))
    }

    /// Register `handler` as the exclusive processor of this channel in the
    /// context of `messenger`.
    ///
    /// Registering a second handler for the same channel in one context
    /// fails with [ChannelError::DuplicateHandler] before anything is sent.
    /// The returned [Subscription] unregisters the handler.
    pub async fn on<F, Fut, E>(
        &self,
        messenger: &Messenger,
        handler: F,
    ) -> Result<Subscription, ChannelError>
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let erased = handler::boxed(move |payload| {
            let decoded = serde_json::from_value::<Req>(payload);
            let call = decoded.map(&handler);
            async move {
                let response = call
                    .map_err(|error| ChannelError::Decode(error.to_string()).to_string())?
                    .await
                    .map_err(|error| ChannelError::HandlerFailed(error.to_string()).to_string())?;
                serde_json::to_value(response)
                    .map_err(|error| ChannelError::Encode(error.to_string()).to_string())
            }
        });

        messenger.register(self.name, erased).await?;

        Ok(Subscription {
            messenger: messenger.clone(),
            channel: self.name,
        })
    }
}

/// A live handler registration, returned by [Channel::on].
#[must_use = "dropping a Subscription keeps the handler registered; call `cancel` to remove it"]
#[derive(Debug)]
pub struct Subscription {
    messenger: Messenger,
    channel: &'static str,
}

impl Subscription {
    /// The channel this subscription handles.
    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// Remove the handler. Requests already being handled run to
    /// completion; later requests fail as canceled.
    pub async fn cancel(self) -> Result<(), ChannelError> {
        self.messenger.unregister(self.channel).await.map(|_| ())
    }
}
