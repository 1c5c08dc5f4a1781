//! Flow hash table with idle expiry
//!
//! Keyed by the initiator's [`FlowKey`]. Lookups from the responder side go
//! through [`FlowTable::locate`], which also reports the packet direction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::{Direction, FlowKey};
use super::{FlowConfig, TableStats};

/// Flow table entry with activity tracking
struct FlowEntry<T> {
    state: T,
    last_seen: Instant,
}

/// Hash table for per-flow state
pub struct FlowTable<T> {
    flows: HashMap<FlowKey, FlowEntry<T>>,
    max_size: usize,
    idle_timeout: Duration,
    pub stats: TableStats,
}

impl<T> FlowTable<T> {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            flows: HashMap::with_capacity(config.table_size.min(10_000)),
            max_size: config.table_size.max(1),
            idle_timeout: config.idle_timeout(),
            stats: TableStats::default(),
        }
    }

    /// Find the stored key for a packet key and the packet's direction
    pub fn locate(&self, key: &FlowKey) -> Option<(FlowKey, Direction)> {
        if self.flows.contains_key(key) {
            return Some((*key, Direction::ToServer));
        }
        let reversed = key.reversed();
        if self.flows.contains_key(&reversed) {
            return Some((reversed, Direction::ToClient));
        }
        None
    }

    /// Insert state for a new flow.
    ///
    /// When the table is full the least recently active flow is evicted and
    /// returned so the caller can discard it.
    pub fn insert(&mut self, key: FlowKey, state: T) -> Option<(FlowKey, T)> {
        let evicted = if !self.flows.contains_key(&key) && self.flows.len() >= self.max_size {
            self.evict_oldest()
        } else {
            None
        };

        self.stats.inserts += 1;
        self.flows.insert(key, FlowEntry {
            state,
            last_seen: Instant::now(),
        });
        evicted
    }

    pub fn get(&self, key: &FlowKey) -> Option<&T> {
        self.flows.get(key).map(|e| &e.state)
    }

    /// Mutable access; counts as activity on the flow
    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut T> {
        self.flows.get_mut(key).map(|e| {
            e.last_seen = Instant::now();
            &mut e.state
        })
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<T> {
        let removed = self.flows.remove(key).map(|e| e.state);
        if removed.is_some() {
            self.stats.removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Remove flows idle for longer than the configured timeout
    pub fn cleanup_expired(&mut self) -> Vec<(FlowKey, T)> {
        let now = Instant::now();
        let idle = self.idle_timeout;
        let expired_keys: Vec<FlowKey> = self.flows
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) >= idle)
            .map(|(key, _)| *key)
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = self.flows.remove(&key) {
                self.stats.expired += 1;
                expired.push((key, entry.state));
            }
        }
        expired
    }

    /// Drop every flow
    pub fn clear(&mut self) {
        self.flows.clear();
    }

    fn evict_oldest(&mut self) -> Option<(FlowKey, T)> {
        let oldest = self.flows
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(k, _)| *k)?;

        self.stats.evictions += 1;
        self.flows.remove(&oldest).map(|e| (oldest, e.state))
    }
}
