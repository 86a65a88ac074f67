//! Batched delivery of log entries out of a ring buffer.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{ChannelError, LogEntry, RingBuffer, RingBufferConfig};

/// Where a [LogStream] delivers its batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver `batch`, oldest entry first. An error leaves the entries in
    /// the buffer for the next attempt.
    async fn send_batch(&self, batch: Vec<LogEntry>) -> Result<(), ChannelError>;
}

#[async_trait]
impl<T> BatchSink for Arc<T>
where
    T: BatchSink + ?Sized,
{
    async fn send_batch(&self, batch: Vec<LogEntry>) -> Result<(), ChannelError> {
        T::send_batch(self, batch).await
    }
}

/// A [RingBuffer] of log entries drained by a background task.
///
/// The task flushes on a fixed interval and as soon as a push fills a
/// batch, so no entry waits longer than the configured interval. Entries
/// are only removed from the buffer once the sink accepted them.
pub struct LogStream {
    buffer: Arc<Mutex<RingBuffer<LogEntry>>>,
    wake: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogStream {
    /// Start streaming into `sink`.
    pub fn start<S>(config: &RingBufferConfig, sink: S) -> Self
    where
        S: BatchSink + 'static,
    {
        let buffer = Arc::new(Mutex::new(RingBuffer::from_config(config)));
        let wake = Arc::new(Notify::new());

        let task = tokio::spawn(flush_loop(
            buffer.clone(),
            wake.clone(),
            sink,
            config.flush_interval,
        ));

        Self {
            buffer,
            wake,
            task: Mutex::new(Some(task)),
        }
    }

    /// Buffer `entry`, waking the flusher if a batch is full.
    pub fn push(&self, entry: LogEntry) {
        if self.buffer.lock().add(entry) {
            self.wake.notify_one();
        }
    }

    /// Number of entries not yet delivered.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether the stream was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.buffer.lock().is_destroyed()
    }

    /// Stop flushing and wipe the buffer. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.buffer.lock().destroy();
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("pending", &self.pending())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

async fn flush_loop<S>(
    buffer: Arc<Mutex<RingBuffer<LogEntry>>>,
    wake: Arc<Notify>,
    sink: S,
    period: std::time::Duration,
) where
    S: BatchSink,
{
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = wake.notified() => {}
        }
        flush(&buffer, &sink).await;
    }
}

/// Deliver every buffered batch, stopping at the first failure.
async fn flush<S>(buffer: &Mutex<RingBuffer<LogEntry>>, sink: &S)
where
    S: BatchSink,
{
    loop {
        let (start, batch) = {
            let buffer = buffer.lock();
            (
                buffer.oldest_sequence(),
                buffer.get_batch(Some(buffer.batch_size())),
            )
        };
        if batch.is_empty() {
            return;
        }

        let size = batch.len();
        match sink.send_batch(batch).await {
            Ok(()) => {
                // Pushes during the send may have overwritten part of the batch
                buffer
                    .lock()
                    .clear_through(start + u64::try_from(size).unwrap_or(u64::MAX));
                tracing::trace!(size, "Flushed log batch");
            }
            Err(error) => {
                tracing::warn!(size, %error, "Failed to flush log batch; keeping it for the next attempt");
                return;
            }
        }
    }
}
