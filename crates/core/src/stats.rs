//! Execution statistics
//!
//! Each context carries a `Stats` record; the counters are observational
//! only and never feed back into runtime decisions. The collection counter
//! is read by *other* threads (a sender checks whether the destination
//! collected while it was copying a message), so the record is built from
//! atomics rather than plain fields.
//!
//! A second set of process-wide monotonic counters tracks context and
//! message lifecycles for the at-exit report:
//!
//! - CONTEXTS_SPAWNED / CONTEXTS_COMPLETED: context lifecycle; a difference
//!   bigger than the number of running contexts indicates a leak
//! - MESSAGES_SENT / MESSAGES_RECEIVED: inter-context traffic

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Total contexts ever created (monotonic).
pub static CONTEXTS_SPAWNED: AtomicU64 = AtomicU64::new(0);
/// Total contexts that have terminated (monotonic).
pub static CONTEXTS_COMPLETED: AtomicU64 = AtomicU64::new(0);
/// Total messages delivered to an inbox (monotonic).
pub static MESSAGES_SENT: AtomicU64 = AtomicU64::new(0);
/// Total messages drained from an inbox (monotonic).
pub static MESSAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);

/// Per-context counters.
pub struct Stats {
    /// Bytes handed out by the bump allocator, including chunk headers.
    allocated_bytes: AtomicU64,
    /// High-water mark of heap usage (bytes).
    peak_heap_bytes: AtomicU64,
    /// Completed collections.
    collections: AtomicU64,
    /// Bytes that survived a collection, summed over all collections.
    copied_bytes: AtomicU64,
    created_at: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            allocated_bytes: AtomicU64::new(0),
            peak_heap_bytes: AtomicU64::new(0),
            collections: AtomicU64::new(0),
            copied_bytes: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Record one allocation and the heap usage after it.
    #[inline]
    pub fn record_alloc(&self, chunk_bytes: u64, heap_used: u64) {
        self.allocated_bytes.fetch_add(chunk_bytes, Ordering::Relaxed);

        // Peak update via CAS loop; uncontended in practice since only the
        // owning thread and message senders allocate here.
        let mut peak = self.peak_heap_bytes.load(Ordering::Relaxed);
        while heap_used > peak {
            match self.peak_heap_bytes.compare_exchange_weak(
                peak,
                heap_used,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    /// Record a completed collection. Publishes with release ordering so a
    /// sender that re-reads the counter also sees the rewritten heap.
    #[inline]
    pub fn record_collection(&self, survivor_bytes: u64) {
        self.copied_bytes.fetch_add(survivor_bytes, Ordering::Relaxed);
        self.collections.fetch_add(1, Ordering::Release);
    }

    /// Completed collection count, as observed by message senders.
    #[inline]
    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            peak_heap_bytes: self.peak_heap_bytes.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
            copied_bytes: self.copied_bytes.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats::new()
    }
}

/// A point-in-time copy of a context's counters, returned by termination.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub allocated_bytes: u64,
    pub peak_heap_bytes: u64,
    pub collections: u64,
    pub copied_bytes: u64,
    pub uptime: Duration,
}
