//! Duplicate request suppression.
//!
//! UDP clients retransmit. A retransmission that arrives while the
//! original is still being processed must be dropped, and one that
//! arrives after a response was sent must receive the exact same
//! response bytes, with no second pass through the engines. Requests
//! are keyed by source address, packet identifier and code; entries
//! expire after a short window, after which the same identifier is a
//! new request.

use aaa_proto::Code;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub source: IpAddr,
    pub identifier: u8,
    pub code: u8,
}

impl RequestKey {
    pub fn new(source: IpAddr, identifier: u8, code: Code) -> Self {
        RequestKey {
            source,
            identifier,
            code: code.as_u8(),
        }
    }
}

enum Slot {
    /// Original still in the engines; retransmissions are dropped.
    Pending { inserted_at: Instant },
    /// Response sent; retransmissions replay these bytes.
    Done {
        inserted_at: Instant,
        response: Vec<u8>,
    },
}

impl Slot {
    fn inserted_at(&self) -> Instant {
        match self {
            Slot::Pending { inserted_at } | Slot::Done { inserted_at, .. } => *inserted_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCheck {
    /// First sighting; a pending entry has been claimed.
    New,
    /// Already being processed, drop the datagram.
    InFlight,
    /// Replay the stored response bytes.
    Replay(Vec<u8>),
}

pub struct ResponseCache {
    entries: DashMap<RequestKey, Slot>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        ResponseCache {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Classify an incoming request and claim a pending slot when it
    /// is new. Expired entries count as new.
    pub fn check(&self, key: RequestKey) -> CacheCheck {
        let now = Instant::now();

        if let Some(mut entry) = self.entries.get_mut(&key) {
            if now.duration_since(entry.inserted_at()) < self.ttl {
                return match &*entry {
                    Slot::Pending { .. } => CacheCheck::InFlight,
                    Slot::Done { response, .. } => CacheCheck::Replay(response.clone()),
                };
            }
            *entry = Slot::Pending { inserted_at: now };
            return CacheCheck::New;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(key, Slot::Pending { inserted_at: now });
        CacheCheck::New
    }

    /// Attach the response bytes to a previously claimed slot.
    pub fn store(&self, key: RequestKey, response: Vec<u8>) {
        self.entries.insert(
            key,
            Slot::Done {
                inserted_at: Instant::now(),
                response,
            },
        );
    }

    /// Release a claimed slot without a response, so the NAS retry is
    /// processed instead of dropped for the rest of the window.
    pub fn forget(&self, key: &RequestKey) {
        self.entries.remove(key);
    }

    /// Drop expired entries. Called by the periodic maintenance task.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| now.duration_since(slot.inserted_at()) < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at())
            .map(|entry| *entry.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(identifier: u8) -> RequestKey {
        RequestKey::new("10.0.0.1".parse().unwrap(), identifier, Code::AccessRequest)
    }

    #[test]
    fn retransmission_while_pending_is_dropped() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        assert_eq!(cache.check(key(1)), CacheCheck::New);
        assert_eq!(cache.check(key(1)), CacheCheck::InFlight);
    }

    #[test]
    fn retransmission_after_response_replays_exact_bytes() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        assert_eq!(cache.check(key(1)), CacheCheck::New);
        cache.store(key(1), vec![1, 2, 3]);
        assert_eq!(cache.check(key(1)), CacheCheck::Replay(vec![1, 2, 3]));
        // Still replayed, not consumed.
        assert_eq!(cache.check(key(1)), CacheCheck::Replay(vec![1, 2, 3]));
    }

    #[test]
    fn different_source_or_code_is_a_different_request() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        cache.check(key(1));

        let other_source =
            RequestKey::new("10.0.0.2".parse().unwrap(), 1, Code::AccessRequest);
        assert_eq!(cache.check(other_source), CacheCheck::New);

        let other_code =
            RequestKey::new("10.0.0.1".parse().unwrap(), 1, Code::AccountingRequest);
        assert_eq!(cache.check(other_code), CacheCheck::New);
    }

    #[test]
    fn expired_entry_counts_as_new() {
        let cache = ResponseCache::new(Duration::ZERO, 100);
        cache.check(key(1));
        cache.store(key(1), vec![9]);
        assert_eq!(cache.check(key(1)), CacheCheck::New);
    }

    #[test]
    fn forget_releases_the_slot() {
        let cache = ResponseCache::new(Duration::from_secs(5), 100);
        assert_eq!(cache.check(key(1)), CacheCheck::New);
        cache.forget(&key(1));
        assert_eq!(cache.check(key(1)), CacheCheck::New);
    }

    #[test]
    fn purge_drops_expired_entries() {
        let cache = ResponseCache::new(Duration::ZERO, 100);
        cache.check(key(1));
        cache.check(key(2));
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.check(key(1));
        std::thread::sleep(Duration::from_millis(5));
        cache.check(key(2));
        cache.check(key(3));
        assert_eq!(cache.len(), 2);
        // Key 1 was oldest, so it became new again.
        assert_eq!(cache.check(key(1)), CacheCheck::New);
    }
}
