//! Bounded FIFO of validated updates awaiting a flush

use parking_lot::Mutex;
use std::collections::VecDeque;
use sync_types::GameDataUpdate;

pub(crate) struct BatchQueue {
    items: Mutex<VecDeque<GameDataUpdate>>,
    max_size: usize,
}

impl BatchQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    /// Append an update, handing it back when the queue is at capacity.
    /// On success returns the new depth.
    pub fn push(&self, update: GameDataUpdate) -> Result<usize, GameDataUpdate> {
        let mut items = self.items.lock();
        if items.len() >= self.max_size {
            return Err(update);
        }
        items.push_back(update);
        Ok(items.len())
    }

    /// Remove up to `max` updates from the front
    pub fn take(&self, max: usize) -> Vec<GameDataUpdate> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }

    /// Remove up to `max` updates as a batch that returns to the front of the
    /// queue unless it is committed
    pub fn take_batch(&self, max: usize) -> InFlightBatch<'_> {
        InFlightBatch {
            queue: self,
            updates: self.take(max),
            committed: false,
        }
    }

    /// Put a failed batch back ahead of newer updates, keeping its order.
    /// Capacity is not enforced here.
    pub fn requeue_front(&self, batch: Vec<GameDataUpdate>) {
        let mut items = self.items.lock();
        for update in batch.into_iter().rev() {
            items.push_front(update);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Batch taken for delivery
///
/// Dropping it uncommitted, whether after a failed delivery or because the
/// flushing future was cancelled, requeues every update at the front.
pub(crate) struct InFlightBatch<'a> {
    queue: &'a BatchQueue,
    updates: Vec<GameDataUpdate>,
    committed: bool,
}

impl InFlightBatch<'_> {
    pub fn updates(&self) -> &[GameDataUpdate] {
        &self.updates
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Delivery finished, the updates leave the queue for good
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.updates.is_empty() {
            self.queue.requeue_front(std::mem::take(&mut self.updates));
        }
    }
}
