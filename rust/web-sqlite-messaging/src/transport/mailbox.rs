//! One-shot deliveries that each await a single reply.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{Inbox, Transport, TransportError, WireMessage};

/// One frame in flight through a mailbox, together with the slot its reply
/// goes into. Dropping a [Delivery] without replying tells the sender that
/// no response is coming.
#[derive(Debug)]
pub struct Delivery {
    message: WireMessage,
    reply: oneshot::Sender<WireMessage>,
}

impl Delivery {
    /// The delivered frame.
    pub fn message(&self) -> &WireMessage {
        &self.message
    }

    /// Split into the frame and its reply slot.
    pub fn into_parts(self) -> (WireMessage, oneshot::Sender<WireMessage>) {
        (self.message, self.reply)
    }

    /// Answer the sender.
    pub fn reply(self, response: WireMessage) {
        // The sender may have given up waiting
        let _ = self.reply.send(response);
    }
}

/// Sending half of a [mailbox].
#[derive(Debug, Clone)]
pub struct MailboxSender {
    deliveries: mpsc::Sender<Delivery>,
}

#[async_trait]
impl Transport for MailboxSender {
    async fn send(&self, message: WireMessage) -> Result<Option<WireMessage>, TransportError> {
        let (reply, response) = oneshot::channel();
        self.deliveries
            .send(Delivery { message, reply })
            .await
            .map_err(|_| TransportError::Closed)?;

        Ok(response.await.ok())
    }
}

/// Receiving half of a [mailbox].
#[derive(Debug)]
pub struct MailboxReceiver {
    deliveries: mpsc::Receiver<Delivery>,
}

impl MailboxReceiver {
    /// Wait for the next delivery; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Answer every delivery with `inbox`, each on its own task so that a
    /// slow handler does not hold up unrelated frames.
    pub async fn serve<I>(mut self, inbox: Arc<I>)
    where
        I: Inbox + ?Sized + 'static,
    {
        while let Some(delivery) = self.recv().await {
            let inbox = inbox.clone();
            tokio::spawn(async move {
                let (message, reply) = delivery.into_parts();
                if let Some(response) = inbox.receive(message).await {
                    let _ = reply.send(response);
                }
            });
        }
        tracing::debug!("Mailbox closed");
    }

    /// Run [MailboxReceiver::serve] on a new task.
    pub fn spawn<I>(self, inbox: Arc<I>) -> JoinHandle<()>
    where
        I: Inbox + ?Sized + 'static,
    {
        tokio::spawn(self.serve(inbox))
    }
}

/// A bounded queue modelling the host's one-shot `sendMessage` /
/// `sendResponse` primitive.
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    let (deliveries, receiver) = mpsc::channel(capacity.max(1));
    (
        MailboxSender { deliveries },
        MailboxReceiver {
            deliveries: receiver,
        },
    )
}
