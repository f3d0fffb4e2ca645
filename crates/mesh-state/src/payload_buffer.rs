//! Priority-ordered, gap-tolerant payload buffer.
//!
//! Payloads arrive out of order, duplicated and with long gaps; the buffer
//! keeps them keyed by sequence so the deliver loop can drain a strictly
//! contiguous prefix. The `next` cursor tracks the sequence expected to
//! commit next and only advances on [`PayloadBuffer::pop`].

use crate::{StateError, StateResult};
use mesh_proto::Payload;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::trace;

/// Reordering buffer exclusively owned by the state provider.
pub struct PayloadBuffer {
    /// Buffered payloads keyed by sequence.
    buf: Mutex<BTreeMap<u64, Payload>>,
    /// Next sequence expected to commit.
    next: AtomicU64,
    /// Window bound relative to `next`.
    max_distance: u64,
    /// Edge-triggered, coalescing readiness signal.
    ready: Notify,
}

impl PayloadBuffer {
    /// Create a buffer expecting `next` as the first poppable sequence.
    pub fn new(next: u64, max_distance: u64) -> Self {
        Self {
            buf: Mutex::new(BTreeMap::new()),
            next: AtomicU64::new(next),
            max_distance,
            ready: Notify::new(),
        }
    }

    /// Next sequence expected to commit.
    pub fn next(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Insert a payload.
    ///
    /// Fails with `OutOfRange` when the sequence is already committed or runs
    /// `max_distance` or more ahead of `next`. A duplicate of an already
    /// buffered sequence succeeds silently.
    pub fn push(&self, payload: Payload) -> StateResult<()> {
        let seq_num = payload.seq_num;
        let mut buf = self.buf.lock();
        let next = self.next.load(Ordering::SeqCst);

        if seq_num < next {
            return Err(StateError::OutOfRange(format!(
                "sequence {} is stale, next expected is {}",
                seq_num, next
            )));
        }
        if seq_num - next >= self.max_distance {
            return Err(StateError::OutOfRange(format!(
                "sequence {} runs too far ahead of {} (max distance {})",
                seq_num, next, self.max_distance
            )));
        }
        if buf.contains_key(&seq_num) {
            trace!(seq_num, "Duplicate payload ignored");
            return Ok(());
        }

        buf.insert(seq_num, payload);
        if seq_num == next {
            self.ready.notify_one();
        }
        Ok(())
    }

    /// Remove and return the payload with sequence `next`, advancing the
    /// cursor. Returns `None` while that sequence is still missing.
    pub fn pop(&self) -> Option<Payload> {
        let mut buf = self.buf.lock();
        let next = self.next.load(Ordering::SeqCst);

        // Purge anything that went stale since it was pushed.
        while let Some(entry) = buf.first_entry() {
            if *entry.key() < next {
                entry.remove();
            } else {
                break;
            }
        }

        match buf.first_key_value() {
            Some((&seq_num, _)) if seq_num == next => {
                let payload = buf.remove(&seq_num);
                self.next.store(next + 1, Ordering::SeqCst);
                payload
            }
            _ => None,
        }
    }

    /// Number of buffered payloads.
    pub fn size(&self) -> usize {
        self.buf.lock().len()
    }

    /// Smallest buffered sequence, if any.
    pub fn min_avail(&self) -> Option<u64> {
        self.buf.lock().first_key_value().map(|(&seq, _)| seq)
    }

    /// Wait until a payload with sequence `next` has been pushed.
    ///
    /// The signal coalesces: after it fires, the caller must drain with
    /// [`pop`](Self::pop) until `None` before waiting again.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}
