//! Numbers known to have no account as of the most recent query.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::e164::E164;

/// Negative-result cache for outgoing-message lookups
#[derive(Debug, Default)]
pub struct UndiscoverableCache {
    entries: HashMap<E164, DateTime<Utc>>,
    ttl: Option<Duration>,
}

impl UndiscoverableCache {
    /// Create a cache. With `ttl = None` entries live until contradicted.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Whether `e164` is currently cached as undiscoverable
    pub fn contains(&self, e164: &E164, now: DateTime<Utc>) -> bool {
        self.entries
            .get(e164)
            .is_some_and(|added| !self.is_expired(*added, now))
    }

    /// The subset of `numbers` not currently cached
    pub fn filter(&self, numbers: &BTreeSet<E164>, now: DateTime<Utc>) -> BTreeSet<E164> {
        numbers
            .iter()
            .filter(|e164| !self.contains(e164, now))
            .copied()
            .collect()
    }

    /// Cache every number in `numbers`
    pub fn insert_all<'a>(&mut self, numbers: impl IntoIterator<Item = &'a E164>, now: DateTime<Utc>) {
        for e164 in numbers {
            self.entries.insert(*e164, now);
        }
    }

    /// Uncache every number in `numbers`
    pub fn remove_all<'a>(&mut self, numbers: impl IntoIterator<Item = &'a E164>) {
        for e164 in numbers {
            self.entries.remove(e164);
        }
    }

    /// Forget a single number, e.g. after learning it registered
    pub fn forget(&mut self, e164: &E164) -> bool {
        self.entries.remove(e164).is_some()
    }

    /// Drop entries whose TTL has elapsed
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let Some(ttl) = self.ttl else {
            return;
        };
        self.entries
            .retain(|_, added| crate::time::after(*added, ttl) > now);
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, added: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => crate::time::after(added, ttl) <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(numbers: &[&str]) -> BTreeSet<E164> {
        numbers.iter().map(|n| E164::parse(n).unwrap()).collect()
    }

    #[test]
    fn test_filter_drops_cached_numbers() {
        let now = Utc::now();
        let mut cache = UndiscoverableCache::new(None);
        cache.insert_all(&set(&["+15550001111"]), now);

        let remaining = cache.filter(&set(&["+15550001111", "+15550002222"]), now);
        assert_eq!(remaining, set(&["+15550002222"]));
    }

    #[test]
    fn test_remove_and_forget() {
        let now = Utc::now();
        let mut cache = UndiscoverableCache::new(None);
        cache.insert_all(&set(&["+15550001111", "+15550002222", "+15550003333"]), now);

        cache.remove_all(&set(&["+15550001111"]));
        assert!(cache.forget(&E164::parse("+15550002222").unwrap()));
        assert!(!cache.forget(&E164::parse("+15550002222").unwrap()));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expires_entries() {
        let now = Utc::now();
        let mut cache = UndiscoverableCache::new(Some(Duration::from_secs(60)));
        let e164 = E164::parse("+15550001111").unwrap();
        cache.insert_all([&e164], now);

        assert!(cache.contains(&e164, now + chrono::Duration::seconds(59)));
        assert!(!cache.contains(&e164, now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_prune_evicts_expired_entries() {
        let now = Utc::now();
        let mut cache = UndiscoverableCache::new(Some(Duration::from_secs(60)));
        cache.insert_all(&set(&["+15550001111"]), now);
        cache.insert_all(&set(&["+15550002222"]), now + chrono::Duration::seconds(30));

        cache.prune(now + chrono::Duration::seconds(60));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(
            &E164::parse("+15550002222").unwrap(),
            now + chrono::Duration::seconds(60)
        ));

        cache.prune(now + chrono::Duration::seconds(90));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_prune_without_ttl_keeps_entries() {
        let now = Utc::now();
        let mut cache = UndiscoverableCache::new(None);
        cache.insert_all(&set(&["+15550001111"]), now);

        cache.prune(now + chrono::Duration::days(365));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let now = Utc::now();
        let mut cache = UndiscoverableCache::new(None);
        let e164 = E164::parse("+15550001111").unwrap();
        cache.insert_all([&e164], now);

        assert!(cache.contains(&e164, now + chrono::Duration::days(365)));
    }
}
