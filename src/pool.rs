//! Reusable buffers for outgoing batches

use crate::telemetry::{Batch, ResourceLogs};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Bounded free list of batch buffers.
///
/// Hits only save an allocation; an empty pool hands out fresh buffers.
#[derive(Debug)]
pub struct BatchPool {
    free: Mutex<Vec<Vec<ResourceLogs>>>,
    buffer_capacity: usize,
    max_retained: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BatchPool {
    /// Create a pool handing out buffers pre-sized to `buffer_capacity`
    pub fn new(buffer_capacity: usize, max_retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_retained)),
            buffer_capacity,
            max_retained,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Take an empty batch, reusing a released buffer when one is available
    pub fn acquire(&self) -> Batch {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let logs = match reused {
            Some(logs) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                logs
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_capacity)
            }
        };

        Batch {
            id: Uuid::new_v4(),
            logs,
        }
    }

    /// Return a batch's storage to the pool
    pub fn release(&self, batch: Batch) {
        let mut logs = batch.logs;
        logs.clear();

        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.max_retained {
            free.push(logs);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Buffers currently waiting for reuse
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{LogLevel, LogRecord, Resource};

    fn filled(pool: &BatchPool) -> Batch {
        let mut batch = pool.acquire();
        batch.logs.push(ResourceLogs::new(
            Resource::new(),
            vec![LogRecord::new(LogLevel::Info, "stale")],
        ));
        batch
    }

    #[test]
    fn test_cold_pool_allocates() {
        let pool = BatchPool::new(16, 4);
        let batch = pool.acquire();

        assert!(batch.logs.is_empty());
        assert!(batch.logs.capacity() >= 16);
        assert_eq!(pool.misses(), 1);
        assert_eq!(pool.hits(), 0);
    }

    #[test]
    fn test_released_buffer_is_reused_without_stale_records() {
        let pool = BatchPool::new(16, 4);
        let batch = filled(&pool);
        let first_id = batch.id;
        pool.release(batch);
        assert_eq!(pool.available(), 1);

        let reused = pool.acquire();
        assert!(reused.logs.is_empty());
        assert_ne!(reused.id, first_id);
        assert_eq!(pool.hits(), 1);
    }

    #[test]
    fn test_release_beyond_limit_is_dropped() {
        let pool = BatchPool::new(4, 2);
        let batches: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        for batch in batches {
            pool.release(batch);
        }

        assert_eq!(pool.available(), 2);
    }
}
