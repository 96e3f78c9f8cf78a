//! Bounded scan queue
//!
//! Thread-safe handoff of finished scans from the acquisition worker to the
//! consumer. Scans are owned values moved through a ring buffer; the worker
//! never blocks on a slow consumer, it overwrites the oldest scan instead.

use super::parser::Scan;
use crate::lock_unpoisoned;
use ringbuf::ring_buffer::RbBase;
use ringbuf::{HeapRb, Rb};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

struct QueueState {
    scans: HeapRb<Scan>,
    generation: u64,
    dropped: u64,
}

/// Scan queue shared between the supervisor and the consumer
///
/// Every scan is published with the generation of the subprocess that
/// produced it. Scans from an older generation are discarded, so output
/// trickling in from a process that is being replaced never reaches the
/// consumer.
pub struct ScanQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl ScanQueue {
    /// Create new queue
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of pending scans
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            state: Mutex::new(QueueState {
                scans: HeapRb::new(capacity),
                generation: 0,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Publish a finished scan and wake one waiting consumer
    ///
    /// # Returns
    /// `false` if the scan belongs to a stale generation and was discarded
    pub fn publish(&self, generation: u64, scan: Scan) -> bool {
        {
            let mut state = lock_unpoisoned(&self.state);
            if state.generation != generation {
                return false;
            }

            if state.scans.is_full() {
                state.dropped += 1;
                log::warn!(
                    "Scan queue full ({} pending), dropping oldest scan",
                    self.capacity
                );
            }
            state.scans.push_overwrite(scan);
        }

        self.available.notify_one();
        true
    }

    /// Take every pending scan, oldest first
    pub fn drain(&self) -> Vec<Scan> {
        let mut state = lock_unpoisoned(&self.state);
        let mut scans = Vec::with_capacity(state.scans.len());
        while let Some(scan) = state.scans.pop() {
            scans.push(scan);
        }
        scans
    }

    /// Block until scans are pending or the timeout elapses
    ///
    /// Wakeups are only a hint; the predicate is re-checked under the lock.
    ///
    /// # Returns
    /// `true` if scans are pending
    pub fn wait_for_scans(&self, timeout: Duration) -> bool {
        let state = lock_unpoisoned(&self.state);
        let (state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.scans.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !state.scans.is_empty()
    }

    /// Invalidate everything published so far
    ///
    /// Pending scans are dropped and later publishes with the old generation
    /// are ignored.
    ///
    /// # Returns
    /// The new generation
    pub fn advance_generation(&self) -> u64 {
        let mut state = lock_unpoisoned(&self.state);
        state.generation += 1;
        state.scans = HeapRb::new(self.capacity);
        state.generation
    }

    /// Generation currently accepted by the queue
    pub fn generation(&self) -> u64 {
        lock_unpoisoned(&self.state).generation
    }

    /// Get number of pending scans
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of scans overwritten because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        lock_unpoisoned(&self.state).dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
