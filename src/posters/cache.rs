use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<String>,
    stored_at: DateTime<Utc>,
}

/// Per-movie cache of a looked-up value (poster URL, plot) with expiry.
///
/// A stored `None` is a confirmed absence ("this movie has no poster") and is
/// a hit, distinct from a miss. Expired entries read as misses. When full,
/// inserting a new id drops expired entries first and then the oldest one.
#[derive(Debug, Clone)]
pub struct TtlCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
}

impl TtlCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    /// `None` on a miss, `Some(value)` on a hit.
    pub fn get(&self, id: &str, now: DateTime<Utc>) -> Option<Option<String>> {
        self.entries
            .get(id)
            .filter(|entry| now - entry.stored_at < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, id: &str, value: Option<String>, now: DateTime<Utc>) {
        if !self.entries.contains_key(id) && self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            id.to_string(),
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.stored_at < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.entries.remove(&id);
        }
    }
}
