//! Bounded hand-off between producers and export workers

use crate::errors::SubmitError;
use crate::telemetry::Batch;
use flume::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

/// Non-blocking intake queue.
///
/// A full queue sheds the new batch instead of blocking the producer.
/// Closing is an explicit flag checked before every submission, so a
/// late producer gets [`SubmitError::Stopped`] rather than racing a
/// closed channel.
#[derive(Debug)]
pub struct IntakeQueue {
    sender: RwLock<Option<Sender<Batch>>>,
    receiver: Receiver<Batch>,
    closed: AtomicBool,
    capacity: usize,
}

impl IntakeQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Enqueue without blocking. On rejection the batch is handed back.
    pub fn submit(&self, batch: Batch) -> Result<(), (SubmitError, Batch)> {
        if self.closed.load(Ordering::Acquire) {
            return Err((SubmitError::Stopped, batch));
        }

        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err((SubmitError::Stopped, batch));
        };

        match sender.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => Err((SubmitError::QueueFull, batch)),
            Err(TrySendError::Disconnected(batch)) => Err((SubmitError::Stopped, batch)),
        }
    }

    /// Receiving side shared by all workers
    pub fn receiver(&self) -> Receiver<Batch> {
        self.receiver.clone()
    }

    /// Stop accepting batches. Workers drain what is queued, then see the channel end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_sheds_new_batches() {
        let queue = IntakeQueue::new(2);

        assert!(queue.submit(Batch::with_capacity(1)).is_ok());
        assert!(queue.submit(Batch::with_capacity(1)).is_ok());

        let rejected = Batch::with_capacity(1);
        let rejected_id = rejected.id;
        let (err, returned) = queue.submit(rejected).unwrap_err();
        assert_eq!(err, SubmitError::QueueFull);
        assert_eq!(returned.id, rejected_id);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_submit_after_close_is_stopped() {
        let queue = IntakeQueue::new(2);
        queue.close();

        let (err, _) = queue.submit(Batch::with_capacity(1)).unwrap_err();
        assert_eq!(err, SubmitError::Stopped);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_close_lets_receivers_drain() {
        let queue = IntakeQueue::new(4);
        let receiver = queue.receiver();
        queue.submit(Batch::with_capacity(1)).unwrap();
        queue.submit(Batch::with_capacity(1)).unwrap();
        queue.close();

        assert!(receiver.recv_async().await.is_ok());
        assert!(receiver.recv_async().await.is_ok());
        assert!(receiver.recv_async().await.is_err());
    }

    #[test]
    fn test_fifo_within_queue() {
        let queue = IntakeQueue::new(3);
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let batch = Batch::with_capacity(1);
                let id = batch.id;
                queue.submit(batch).unwrap();
                id
            })
            .collect();

        let receiver = queue.receiver();
        let drained: Vec<_> = receiver.try_iter().map(|b| b.id).collect();
        assert_eq!(drained, ids);
    }
}
