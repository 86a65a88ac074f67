//! Long-lived duplex ports with requests matched to replies by correlation id.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    ChannelError, CorrelationId, Inbox, MessageKind, Transport, TransportError, WireMessage,
};

#[derive(Default)]
struct Waiters {
    pending: HashMap<CorrelationId, oneshot::Sender<WireMessage>>,
    closed: bool,
}

/// A frame on the port. Announcements carry a slot the reading end fills
/// once the announcement has been applied.
#[derive(Debug)]
struct Frame {
    message: WireMessage,
    applied: Option<oneshot::Sender<()>>,
}

impl From<WireMessage> for Frame {
    fn from(message: WireMessage) -> Self {
        Self {
            message,
            applied: None,
        }
    }
}

struct Shared {
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    waiters: Mutex<Waiters>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn sender(&self) -> Option<mpsc::Sender<Frame>> {
        self.outbound.lock().clone()
    }

    /// Fail every waiter and refuse new ones.
    fn close(&self) {
        let mut waiters = self.waiters.lock();
        waiters.closed = true;
        // Dropping the reply slots wakes each waiter with an error
        waiters.pending.clear();
    }

    fn resolve(&self, response: WireMessage) {
        let Some(id) = response.correlation_id.clone() else {
            tracing::warn!(channel = %response.channel, "Dropping response without correlation id");
            return;
        };

        match self.waiters.lock().pending.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => {
                tracing::trace!(
                    channel = %response.channel,
                    correlation_id = %id,
                    "Dropping response for unknown or settled request"
                );
            }
        }
    }
}

/// One unconnected end of a [port].
#[derive(Debug)]
pub struct PortEnd {
    outbound: mpsc::Sender<Frame>,
    inbound: mpsc::Receiver<Frame>,
}

impl PortEnd {
    /// Start reading this end. Requests and announcements arriving from the
    /// other end are handed to `inbox`; responses resolve the matching
    /// [Port::send] call.
    pub fn connect<I>(self, inbox: Arc<I>) -> Port
    where
        I: Inbox + ?Sized + 'static,
    {
        let shared = Arc::new(Shared {
            outbound: Mutex::new(Some(self.outbound)),
            waiters: Mutex::new(Waiters::default()),
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(read(self.inbound, shared.clone(), inbox));
        *shared.reader.lock() = Some(reader);

        Port { shared }
    }
}

async fn read<I>(mut inbound: mpsc::Receiver<Frame>, shared: Arc<Shared>, inbox: Arc<I>)
where
    I: Inbox + ?Sized + 'static,
{
    while let Some(Frame { message: frame, applied }) = inbound.recv().await {
        match frame.kind {
            MessageKind::Response => shared.resolve(frame),
            MessageKind::Request => {
                let shared = shared.clone();
                let inbox = inbox.clone();
                tokio::spawn(async move {
                    let response = match inbox.receive(frame.clone()).await {
                        Some(response) => response,
                        None => frame.fail(
                            ChannelError::NoResponse {
                                channel: frame.channel.clone(),
                            }
                            .to_string(),
                        ),
                    };
                    // Fetch the sender only now so a disconnect during a
                    // slow handler is not held open by this task
                    if let Some(outbound) = shared.sender() {
                        let _ = outbound.send(response.into()).await;
                    }
                });
            }
            // Applied before the next frame is read, so requests sent after
            // an announcement always observe it
            MessageKind::Register | MessageKind::Unregister => {
                inbox.receive(frame).await;
                if let Some(applied) = applied {
                    let _ = applied.send(());
                }
            }
        }
    }

    tracing::debug!("Port closed by the remote end");
    shared.close();
}

/// A long-lived duplex connection modelling the host's `runtime.connect`
/// port. Requests and responses travel as independent frames and are
/// matched up by correlation id, so any number of calls may be in flight at
/// once.
#[derive(Clone)]
pub struct Port {
    shared: Arc<Shared>,
}

impl Port {
    /// Close this end. Pending calls fail with
    /// [TransportError::Disconnected] and the other end observes the
    /// disconnect once its pending frames drain.
    pub fn disconnect(&self) {
        self.shared.outbound.lock().take();
        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
        self.shared.close();
    }

    /// Whether this end can no longer carry calls.
    pub fn is_closed(&self) -> bool {
        self.shared.waiters.lock().closed
    }

    /// Number of calls awaiting a response.
    pub fn pending(&self) -> usize {
        self.shared.waiters.lock().pending.len()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

#[async_trait]
impl Transport for Port {
    async fn send(&self, message: WireMessage) -> Result<Option<WireMessage>, TransportError> {
        let outbound = self.shared.sender().ok_or(TransportError::Closed)?;

        match (&message.kind, message.correlation_id.clone()) {
            (MessageKind::Request, Some(id)) => {
                let (tx, rx) = oneshot::channel();
                {
                    let mut waiters = self.shared.waiters.lock();
                    if waiters.closed {
                        return Err(TransportError::Disconnected);
                    }
                    waiters.pending.insert(id.clone(), tx);
                }

                if outbound.send(message.into()).await.is_err() {
                    self.shared.waiters.lock().pending.remove(&id);
                    return Err(TransportError::Closed);
                }
                rx.await.map(Some).map_err(|_| TransportError::Disconnected)
            }
            (MessageKind::Register | MessageKind::Unregister, _) => {
                let (tx, rx) = oneshot::channel();
                let frame = Frame {
                    message,
                    applied: Some(tx),
                };
                outbound
                    .send(frame)
                    .await
                    .map_err(|_| TransportError::Closed)?;
                rx.await.map_err(|_| TransportError::Disconnected)?;
                Ok(None)
            }
            _ => {
                outbound
                    .send(message.into())
                    .await
                    .map_err(|_| TransportError::Closed)?;
                Ok(None)
            }
        }
    }
}

/// Create a connected pair of port ends.
pub fn port(capacity: usize) -> (PortEnd, PortEnd) {
    let (left_tx, left_rx) = mpsc::channel(capacity.max(1));
    let (right_tx, right_rx) = mpsc::channel(capacity.max(1));
    (
        PortEnd {
            outbound: left_tx,
            inbound: right_rx,
        },
        PortEnd {
            outbound: right_tx,
            inbound: left_rx,
        },
    )
}
