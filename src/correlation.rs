//! Request/response correlation.
//!
//! # Responsibilities
//! - Hold captured write commands until the upstream answers them
//! - Hand each matched command out exactly once
//! - Bound memory by count and by age, evicting oldest first
//!
//! # Design Decisions
//! - Insertion order is a `BTreeMap` keyed by a monotonic sequence number, so
//!   `take_if_present` removes from both indexes in O(log n) and the order
//!   index never accumulates tombstones
//! - Time is passed in explicitly by the `_at` variants; the plain methods use
//!   `Instant::now()`

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bson::Document;

use crate::config::CorrelationConfig;
use crate::observability::metrics;
use crate::wire::OperationInfo;

/// The decoded view of a client request that matched a write command.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedCommand {
    pub request_id: i32,
    pub info: OperationInfo,
    pub command: Document,
}

/// A captured command waiting for its response.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub command: CapturedCommand,
    pub inserted_at: Instant,
    sequence: u64,
}

impl PendingEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }
}

/// Why an entry left the table without being matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Capacity,
    Stale,
}

impl EvictionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionReason::Capacity => "capacity",
            EvictionReason::Stale => "stale",
        }
    }
}

/// Bounded map from request id to pending command.
#[derive(Debug)]
pub struct CorrelationTable {
    entries: HashMap<i32, PendingEntry>,
    order: BTreeMap<u64, i32>,
    next_sequence: u64,
    max_pending: usize,
    stale_after: Duration,
}

impl CorrelationTable {
    /// `max_pending` is clamped to at least one entry.
    pub fn new(max_pending: usize, stale_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_sequence: 0,
            max_pending: max_pending.max(1),
            stale_after,
        }
    }

    pub fn from_config(config: &CorrelationConfig) -> Self {
        Self::new(config.max_pending, Duration::from_secs(config.stale_after_secs))
    }

    pub fn insert(&mut self, command: CapturedCommand) {
        self.insert_at(command, Instant::now());
    }

    /// Evict, then store `command` under its request id.
    ///
    /// A reused id replaces the previous entry.
    pub fn insert_at(&mut self, command: CapturedCommand, now: Instant) {
        let request_id = command.request_id;
        if let Some(previous) = self.entries.remove(&request_id) {
            self.order.remove(&previous.sequence);
            tracing::debug!(request_id, "Replacing pending entry with reused request id");
        }

        self.evict_stale(now);
        while self.entries.len() >= self.max_pending {
            if !self.evict_oldest(EvictionReason::Capacity) {
                break;
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.order.insert(sequence, request_id);
        self.entries.insert(
            request_id,
            PendingEntry {
                command,
                inserted_at: now,
                sequence,
            },
        );
    }

    pub fn take_if_present(&mut self, response_to: i32) -> Option<PendingEntry> {
        self.take_if_present_at(response_to, Instant::now())
    }

    /// Remove and return the entry for `response_to`.
    ///
    /// A stale entry is removed but reported as absent.
    pub fn take_if_present_at(&mut self, response_to: i32, now: Instant) -> Option<PendingEntry> {
        let entry = self.entries.remove(&response_to)?;
        self.order.remove(&entry.sequence);

        if entry.age(now) > self.stale_after {
            metrics::record_correlation_eviction(EvictionReason::Stale.as_str());
            tracing::debug!(request_id = response_to, "Response arrived after pending entry went stale");
            return None;
        }
        Some(entry)
    }

    /// Drop every entry older than the staleness window.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        self.evict_stale(now)
    }

    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, request_id: i32) -> bool {
        self.entries.contains_key(&request_id)
    }

    pub fn capacity(&self) -> usize {
        self.max_pending
    }

    fn evict_stale(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some((_, request_id)) = self.order.first_key_value() {
            let expired = self
                .entries
                .get(request_id)
                .map_or(true, |entry| entry.age(now) > self.stale_after);
            if !expired || !self.evict_oldest(EvictionReason::Stale) {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn evict_oldest(&mut self, reason: EvictionReason) -> bool {
        let Some((_, request_id)) = self.order.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&request_id) {
            metrics::record_correlation_eviction(reason.as_str());
            tracing::debug!(
                request_id,
                reason = reason.as_str(),
                namespace = %entry.command.info.namespace(),
                "Evicted pending entry"
            );
        }
        true
    }
}

/// A [`CorrelationTable`] shared by both directions of one session.
///
/// The lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct SharedCorrelationTable {
    inner: Arc<Mutex<CorrelationTable>>,
}

impl SharedCorrelationTable {
    pub fn new(table: CorrelationTable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }

    pub fn insert(&self, command: CapturedCommand) {
        self.lock().insert(command);
    }

    pub fn take_if_present(&self, response_to: i32) -> Option<PendingEntry> {
        self.lock().take_if_present(response_to)
    }

    pub fn sweep(&self) -> usize {
        self.lock().sweep()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the maps half-updated in a
    // way that matters for best-effort audit, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, CorrelationTable> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
