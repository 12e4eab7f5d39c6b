// Small utilities shared across modules

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Cache of recently-seen keys with a caller-injected TTL. Owned by whoever
/// needs de-duplication (no module-level statics); `first_seen` returns true
/// only the first time a key shows up inside the TTL window.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash> {
    ttl: Duration,
    entries: HashMap<K, Instant>,
}

impl<K: Eq + Hash> TtlCache<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn first_seen(&mut self, key: K) -> bool {
        let now = Instant::now();
        self.entries
            .retain(|_, seen| now.duration_since(*seen) < self.ttl);
        match self.entries.get(&key) {
            Some(_) => false,
            None => {
                self.entries.insert(key, now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `Retry-After` header value. Only the delay-seconds form is
/// supported; HTTP-date values fall back to `None`.
pub fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    let secs = value?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_cache_dedupes_within_window() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.first_seen("rate-limit:/v1/chat"));
        assert!(!cache.first_seen("rate-limit:/v1/chat"));
        assert!(cache.first_seen("rate-limit:/v1/models"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn ttl_cache_expires_entries() {
        let mut cache = TtlCache::new(Duration::from_millis(0));
        assert!(cache.first_seen("k"));
        // zero TTL: every sighting is fresh again
        assert!(cache.first_seen("k"));
    }

    #[test]
    fn retry_after_parses_seconds_only() {
        use reqwest::header::HeaderValue;
        let v = HeaderValue::from_static("17");
        assert_eq!(parse_retry_after(Some(&v)), Some(Duration::from_secs(17)));
        let date = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&date)), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
