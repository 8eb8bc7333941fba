//! Deduplication ledger for one run

use crate::url::dedup_key;
use dashmap::DashSet;

/// Records which identifiers have been discovered and processed
///
/// Identifiers are normalized before comparison, so equivalent URLs share
/// one entry. Every `mark_*` call is a single atomic insert: exactly one
/// caller wins for a given identifier, no matter how many race.
#[derive(Debug, Default)]
pub struct SeenStore {
    discovered: DashSet<String>,
    processed: DashSet<String>,
}

impl SeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff this is the first time `url` is discovered
    pub fn mark_discovered(&self, url: &str) -> bool {
        self.discovered.insert(dedup_key(url))
    }

    /// Returns true iff this is the first time `url` is processed
    pub fn mark_processed(&self, url: &str) -> bool {
        self.processed.insert(dedup_key(url))
    }

    pub fn is_discovered(&self, url: &str) -> bool {
        self.discovered.contains(&dedup_key(url))
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.processed.contains(&dedup_key(url))
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Normalized discovered keys, sorted
    pub fn discovered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.discovered.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Normalized processed keys, sorted
    pub fn processed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.processed.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Rebuilds a store from previously exported keys
    pub fn restore<D, P>(discovered: D, processed: P) -> Self
    where
        D: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
    {
        Self {
            discovered: discovered.into_iter().collect(),
            processed: processed.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_mark_discovered_first_writer_wins() {
        let seen = SeenStore::new();
        assert!(seen.mark_discovered("https://example.com/a"));
        assert!(!seen.mark_discovered("https://example.com/a"));
        assert!(!seen.mark_discovered("https://EXAMPLE.com/a/#x"));
        assert!(seen.is_discovered("https://example.com/a/"));
    }

    #[test]
    fn test_discovered_and_processed_are_separate() {
        let seen = SeenStore::new();
        seen.mark_discovered("https://example.com/a");
        assert!(!seen.is_processed("https://example.com/a"));

        assert!(seen.mark_processed("https://example.com/a"));
        assert!(!seen.mark_processed("https://example.com/a"));
        assert!(seen.is_processed("https://example.com/a"));
    }

    #[test]
    fn test_concurrent_marks_have_one_winner() {
        let seen = Arc::new(SeenStore::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let seen = Arc::clone(&seen);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        if seen.mark_discovered(&format!("https://example.com/{}", i)) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 100);
        assert_eq!(seen.discovered_count(), 100);
    }

    #[test]
    fn test_restore_round_trip() {
        let seen = SeenStore::new();
        seen.mark_discovered("https://example.com/a");
        seen.mark_processed("https://example.com/a");

        let restored = SeenStore::restore(seen.discovered_keys(), seen.processed_keys());
        assert!(!restored.mark_discovered("https://example.com/a"));
        assert!(restored.is_processed("https://example.com/a"));
    }
}
