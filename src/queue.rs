use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::reporter::UsageRecord;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded hand-off between request handlers and the usage recorder
///
/// `push` never waits: the lock is only held for a `VecDeque` operation.
pub struct UsageQueue {
    queue: Mutex<VecDeque<UsageRecord>>,
    notify: Notify,
    capacity: usize,
}

impl Default for UsageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Returns false if the record was dropped because the queue is full
    pub fn push(&self, record: UsageRecord) -> bool {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(record);
        }
        self.notify.notify_one();
        true
    }

    pub async fn pop(&self) -> UsageRecord {
        loop {
            if let Some(record) = self.queue.lock().pop_front() {
                return record;
            }
            self.notify.notified().await;
        }
    }

    /// Takes everything currently queued
    pub fn drain(&self) -> Vec<UsageRecord> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
