//! Outbound opportunity bus.
//!
//! Single producer (the detector), any number of consumers. Every consumer
//! owns a bounded lock-free ring; publishing clones the opportunity into
//! each ring and never blocks, so a slow consumer can only lose its own
//! data. Per-consumer delivery order equals production order; nothing is
//! guaranteed across consumers.

use crate::types::Opportunity;
use crossbeam_queue::ArrayQueue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What to do when a consumer's ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Evict the oldest queued opportunity to make room (default).
    DropOldest,
    /// Discard the incoming opportunity.
    DropNewest,
}

struct ConsumerSlot {
    queue: Arc<ArrayQueue<Opportunity>>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

pub struct OpportunityBus {
    consumers: RwLock<Vec<ConsumerSlot>>,
    default_capacity: usize,
    published: AtomicU64,
}

impl OpportunityBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            consumers: RwLock::new(Vec::new()),
            default_capacity: default_capacity.max(1),
            published: AtomicU64::new(0),
        }
    }

    /// Register a consumer with the bus-default ring size and drop-oldest
    /// back-pressure.
    pub fn subscribe(&self) -> BusConsumer {
        self.subscribe_with(self.default_capacity, OverflowPolicy::DropOldest)
    }

    /// Register a consumer with an explicit ring size and overflow policy.
    pub fn subscribe_with(&self, capacity: usize, policy: OverflowPolicy) -> BusConsumer {
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let dropped = Arc::new(AtomicU64::new(0));
        self.consumers.write().push(ConsumerSlot {
            queue: Arc::clone(&queue),
            policy,
            dropped: Arc::clone(&dropped),
        });
        BusConsumer { queue, dropped }
    }

    /// Deliver one opportunity to every registered consumer. Non-blocking:
    /// full rings apply their overflow policy and the producer moves on.
    pub fn publish(&self, opportunity: &Opportunity) {
        self.published.fetch_add(1, Ordering::Relaxed);

        let consumers = self.consumers.read();
        for slot in consumers.iter() {
            match slot.policy {
                OverflowPolicy::DropOldest => {
                    if let Err(rejected) = slot.queue.push(opportunity.clone()) {
                        slot.queue.pop();
                        slot.dropped.fetch_add(1, Ordering::Relaxed);
                        let _ = slot.queue.push(rejected);
                    }
                }
                OverflowPolicy::DropNewest => {
                    if slot.queue.push(opportunity.clone()).is_err() {
                        slot.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Total opportunities published since construction.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total opportunities dropped across all consumers.
    pub fn dropped_count(&self) -> u64 {
        self.consumers
            .read()
            .iter()
            .map(|slot| slot.dropped.load(Ordering::Relaxed))
            .sum()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }
}

/// Receiving handle for one consumer. Draining is the caller's business;
/// opportunities popped here are owned copies.
pub struct BusConsumer {
    queue: Arc<ArrayQueue<Opportunity>>,
    dropped: Arc<AtomicU64>,
}

impl BusConsumer {
    /// Pop the next opportunity, oldest first. Non-blocking.
    pub fn pop(&self) -> Option<Opportunity> {
        self.queue.pop()
    }

    /// Pop up to `max_batch` opportunities.
    pub fn pop_batch(&self, max_batch: usize) -> Vec<Opportunity> {
        let mut batch = Vec::with_capacity(max_batch.min(self.queue.len()));
        for _ in 0..max_batch {
            match self.queue.pop() {
                Some(opportunity) => batch.push(opportunity),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Opportunities this consumer lost to back-pressure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
