//! Best-effort, process-local fixed-window request throttle.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Table size above which expired windows are pruned on insert.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter<K> {
    entries: Mutex<HashMap<K, Window>>,
}

impl<K> Default for RateLimiter<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone> RateLimiter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow at most `max` requests per `window` from `client`.
    pub fn allow(&self, client: &K, window: Duration, max: u32) -> bool {
        self.allow_at(client, window, max, Instant::now())
    }

    pub fn allow_at(&self, client: &K, window: Duration, max: u32, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= PRUNE_THRESHOLD && !entries.contains_key(client) {
            entries.retain(|_, w| now < w.reset_at);
        }

        let entry = entries.entry(client.clone()).or_insert(Window {
            count: 0,
            reset_at: now,
        });
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= max
    }

    /// Drop every entry whose window has elapsed, returning how many were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, w| now < w.reset_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_n_allowed_then_rejected_then_reset() {
        let limiter = RateLimiter::new();
        let client = "10.0.0.1".to_string();
        let start = Instant::now();

        for i in 0..5 {
            let at = start + Duration::from_secs(i);
            assert!(limiter.allow_at(&client, WINDOW, 5, at), "request {i}");
        }
        assert!(!limiter.allow_at(&client, WINDOW, 5, start + Duration::from_secs(30)));
        assert!(!limiter.allow_at(&client, WINDOW, 5, start + Duration::from_secs(59)));

        // first request once the window elapsed starts a fresh one
        assert!(limiter.allow_at(&client, WINDOW, 5, start + WINDOW));
        for _ in 0..4 {
            assert!(limiter.allow_at(&client, WINDOW, 5, start + WINDOW));
        }
        assert!(!limiter.allow_at(&client, WINDOW, 5, start + WINDOW));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.allow_at(&1u32, WINDOW, 1, now));
        assert!(!limiter.allow_at(&1u32, WINDOW, 1, now));
        assert!(limiter.allow_at(&2u32, WINDOW, 1, now));
    }

    #[test]
    fn test_zero_max_rejects_everything() {
        let limiter = RateLimiter::new();
        assert!(!limiter.allow(&"c", WINDOW, 0));
    }

    #[test]
    fn test_prune_drops_elapsed_windows() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.allow_at(&"a", Duration::from_secs(1), 10, now);
        limiter.allow_at(&"b", Duration::from_secs(100), 10, now);
        assert_eq!(limiter.len(), 2);

        assert_eq!(limiter.prune(now + Duration::from_secs(2)), 1);
        assert_eq!(limiter.len(), 1);
    }
}
