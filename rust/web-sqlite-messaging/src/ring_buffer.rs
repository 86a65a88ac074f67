//! A fixed-capacity buffer that overwrites its oldest entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RingBufferConfig;

/// One log event captured from the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Severity as reported by the page, e.g. `"info"`.
    pub level: String,
    /// The event body.
    pub data: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A fixed-capacity circular store that overwrites its oldest entry once
/// full.
///
/// Reading a batch does not consume it: [RingBuffer::get_batch] may be
/// called any number of times and returns the same entries until
/// [RingBuffer::clear_batch] confirms they were delivered.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    count: usize,
    written: u64,
    batch_size: usize,
    destroyed: bool,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer of `capacity` slots whose [RingBuffer::add]
    /// signals a flush once `batch_size` entries are held.
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            count: 0,
            written: 0,
            batch_size: batch_size.clamp(1, capacity),
            destroyed: false,
        }
    }

    /// Create a buffer sized by `config`.
    pub fn from_config(config: &RingBufferConfig) -> Self {
        Self::new(config.capacity, config.batch_size)
    }

    /// Store `entry`, overwriting the oldest entry when full. Returns
    /// whether the buffer now holds at least a batch worth of entries.
    ///
    /// A destroyed buffer ignores writes.
    pub fn add(&mut self, entry: T) -> bool {
        if self.destroyed {
            return false;
        }

        let capacity = self.slots.len();
        self.slots[self.head] = Some(entry);
        self.head = (self.head + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
        self.written += 1;

        self.count >= self.batch_size
    }

    /// Up to `max` of the oldest entries in insertion order (all entries
    /// when `max` is `None`). Does not modify the buffer.
    pub fn get_batch(&self, max: Option<usize>) -> Vec<T>
    where
        T: Clone,
    {
        let capacity = self.slots.len();
        let take = max.map_or(self.count, |max| max.min(self.count));
        let start = (self.head + capacity - self.count) % capacity;

        (0..take)
            .filter_map(|offset| self.slots[(start + offset) % capacity].clone())
            .collect()
    }

    /// Forget the `n` oldest entries (all entries when `n` is `None`).
    pub fn clear_batch(&mut self, n: Option<usize>) {
        let n = n.map_or(self.count, |n| n.min(self.count));
        self.count -= n;
    }

    /// Sequence number of the oldest held entry, the first one
    /// [RingBuffer::get_batch] returns. Every accepted write takes the next
    /// number, starting at zero.
    pub fn oldest_sequence(&self) -> u64 {
        self.written - u64::try_from(self.count).unwrap_or(self.written)
    }

    /// Forget every held entry numbered below `end`.
    ///
    /// Pair with [RingBuffer::oldest_sequence] taken when a batch was read:
    /// clearing through `start + batch.len()` removes only what is left of
    /// that batch, even if later writes overwrote part of it meanwhile.
    pub fn clear_through(&mut self, end: u64) {
        let delivered = end.saturating_sub(self.oldest_sequence());
        let n = usize::try_from(delivered).unwrap_or(usize::MAX).min(self.count);
        self.count -= n;
    }

    /// Wipe the buffer. Later writes are ignored. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.count = 0;
        self.destroyed = true;
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no entries are held.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entry count at which [RingBuffer::add] signals a flush.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether [RingBuffer::destroy] was called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
