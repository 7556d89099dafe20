//! Credential cache
//!
//! Maps an identity to the verification token of its last successful
//! authentication. Entries expire a fixed time after they were written;
//! expiry is checked lazily on lookup and eagerly by [`CredentialCache::purge_expired`].

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    token: String,
    expires_at: Instant,
}

/// Identity → token cache with a fixed time-to-live
pub struct CredentialCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A zero TTL turns the cache off
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Token stored for `identity`, unless absent or expired
    pub fn lookup(&self, identity: &str) -> Option<String> {
        let now = self.clock.now();
        self.entries
            .read()
            .get(identity)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.token.clone())
    }

    /// Store `token` for `identity`, restarting its expiry window
    pub fn put(&self, identity: &str, token: String) {
        if !self.is_enabled() {
            return;
        }

        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .write()
            .insert(identity.to_string(), CacheEntry { token, expires_at });
    }

    /// Identities with a live entry
    pub fn identities(&self) -> BTreeSet<String> {
        let now = self.clock.now();
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Clock that only moves when told to
    pub(crate) struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    fn cache(ttl_secs: u64) -> (CredentialCache, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let cache = CredentialCache::with_clock(Duration::from_secs(ttl_secs), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_put_then_lookup() {
        let (cache, _) = cache(60);
        cache.put("alice", "token-a".to_string());

        assert_eq!(cache.lookup("alice").as_deref(), Some("token-a"));
        assert_eq!(cache.lookup("bob"), None);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache(60);
        cache.put("alice", "token-a".to_string());

        clock.advance(Duration::from_secs(59));
        assert!(cache.lookup("alice").is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.lookup("alice"), None);
        assert!(cache.identities().is_empty());
    }

    #[test]
    fn test_put_restarts_window() {
        let (cache, clock) = cache(60);
        cache.put("alice", "old".to_string());

        clock.advance(Duration::from_secs(50));
        cache.put("alice", "new".to_string());

        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.lookup("alice").as_deref(), Some("new"));
    }

    #[test]
    fn test_identities_skips_expired() {
        let (cache, clock) = cache(60);
        cache.put("alice", "a".to_string());
        clock.advance(Duration::from_secs(30));
        cache.put("bob", "b".to_string());
        clock.advance(Duration::from_secs(40));

        let ids: Vec<_> = cache.identities().into_iter().collect();
        assert_eq!(ids, vec!["bob".to_string()]);
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache(10);
        cache.put("alice", "a".to_string());
        cache.put("bob", "b".to_string());
        clock.advance(Duration::from_secs(5));
        cache.put("carol", "c".to_string());
        clock.advance(Duration::from_secs(6));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let (cache, _) = cache(0);
        assert!(!cache.is_enabled());

        cache.put("alice", "a".to_string());
        assert!(cache.is_empty());
        assert_eq!(cache.lookup("alice"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_are_visible() {
        let cache = Arc::new(CredentialCache::new(Duration::from_secs(300)));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reader = {
            let cache = cache.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut seen = 0;
                while !done.load(std::sync::atomic::Ordering::Acquire) {
                    let identities = cache.identities();
                    assert!(identities.len() >= seen);
                    seen = identities.len();
                    tokio::task::yield_now().await;
                }
            })
        };

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let user = format!("user{}", i);
                    let token = format!("token{}", i);
                    cache.put(&user, token.clone());
                    assert_eq!(cache.lookup(&user), Some(token));
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap();
        }
        done.store(true, std::sync::atomic::Ordering::Release);
        reader.await.unwrap();

        assert_eq!(cache.len(), 32);
        let identities = cache.identities();
        for i in 0..32 {
            let user = format!("user{}", i);
            assert!(identities.contains(&user));
            assert_eq!(cache.lookup(&user), Some(format!("token{}", i)));
        }
    }
}
