//! Message-passing primitives between execution contexts.
//!
//! Two seams abstract the host:
//!
//! - [Transport] delivers a [WireMessage] to some other context and hands
//!   back whatever that context replied (at most one frame).
//! - [Inbox] is the receiving half: it processes one inbound frame.
//!
//! [Direct] glues the two together in-process. [mailbox] and [port] model
//! the host's one-shot and long-lived message primitives on top of tokio
//! channels, so that each context can run on its own task.
//!
//! Tab-scoped contexts (content scripts) are reached through
//! [TabMessenger] instead, which the host implements on top of its tab
//! messaging API.

use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{TransportError, WireMessage};

mod mailbox;
pub use mailbox::*;

mod port;
pub use port::*;

/// Delivers frames to another execution context.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message`. `Ok(None)` means the receiver accepted the frame
    /// but produced no reply.
    async fn send(&self, message: WireMessage) -> Result<Option<WireMessage>, TransportError>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, message: WireMessage) -> Result<Option<WireMessage>, TransportError> {
        T::send(self, message).await
    }
}

/// Processes frames arriving at an execution context.
#[async_trait]
pub trait Inbox: Send + Sync {
    /// Handle one inbound frame, optionally replying.
    async fn receive(&self, message: WireMessage) -> Option<WireMessage>;
}

#[async_trait]
impl<T> Inbox for Arc<T>
where
    T: Inbox + ?Sized,
{
    async fn receive(&self, message: WireMessage) -> Option<WireMessage> {
        T::receive(self, message).await
    }
}

/// A [Transport] that hands frames straight to an [Inbox] in the same task.
#[derive(Debug, Clone)]
pub struct Direct<I>(pub I);

#[async_trait]
impl<I> Transport for Direct<I>
where
    I: Inbox,
{
    async fn send(&self, message: WireMessage) -> Result<Option<WireMessage>, TransportError> {
        Ok(self.0.receive(message).await)
    }
}

/// Identifier of a browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The host's tab-scoped messaging primitive.
#[async_trait]
pub trait TabMessenger: Send + Sync {
    /// The tab currently being inspected, if any.
    async fn active_tab(&self) -> Result<Option<TabId>, TransportError>;

    /// Deliver `message` to the content script of `tab`.
    async fn send_to_tab(
        &self,
        tab: TabId,
        message: WireMessage,
    ) -> Result<Option<WireMessage>, TransportError>;
}

#[async_trait]
impl<T> TabMessenger for Arc<T>
where
    T: TabMessenger + ?Sized,
{
    async fn active_tab(&self) -> Result<Option<TabId>, TransportError> {
        T::active_tab(self).await
    }

    async fn send_to_tab(
        &self,
        tab: TabId,
        message: WireMessage,
    ) -> Result<Option<WireMessage>, TransportError> {
        T::send_to_tab(self, tab, message).await
    }
}
