use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::model::{PriceReading, PriceSource};

pub const DEFAULT_CAPACITY: usize = 20;

/// Value copy of a reading as stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCacheEntry {
    pub price: f64,
    pub percentage_change: Option<f64>,
    pub currency: String,
    pub source: PriceSource,
    pub timestamp: DateTime<Utc>,
}

impl From<&PriceReading> for PriceCacheEntry {
    fn from(reading: &PriceReading) -> Self {
        Self {
            price: reading.price,
            percentage_change: reading.percentage_change,
            currency: reading.currency.clone(),
            source: reading.source,
            timestamp: reading.timestamp,
        }
    }
}

impl From<PriceCacheEntry> for PriceReading {
    fn from(entry: PriceCacheEntry) -> Self {
        Self {
            price: entry.price,
            percentage_change: entry.percentage_change,
            currency: entry.currency,
            source: entry.source,
            timestamp: entry.timestamp,
        }
    }
}

/// Fixed-capacity FIFO of recent readings.
///
/// Entries are kept oldest-first and reversed on read. Writers take the lock
/// exclusively; readers share it.
pub struct PriceCache {
    capacity: usize,
    entries: RwLock<VecDeque<PriceCacheEntry>>,
}

impl PriceCache {
    /// A zero capacity is bumped to one so the latest reading is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add(&self, reading: &PriceReading) {
        let entry = PriceCacheEntry::from(reading);
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn latest(&self) -> Option<PriceCacheEntry> {
        self.entries.read().back().cloned()
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn history(&self, limit: usize) -> Vec<PriceCacheEntry> {
        let entries = self.entries.read();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn reading(price: f64) -> PriceReading {
        PriceReading::new(price, Some(1.0), "USD", PriceSource::Binance)
    }

    #[test]
    fn empty_cache_has_no_latest() {
        let cache = PriceCache::new(3);
        assert!(cache.latest().is_none());
        assert!(cache.is_empty());
        assert!(cache.history(5).is_empty());
    }

    #[test]
    fn latest_returns_most_recent() {
        let cache = PriceCache::new(3);
        cache.add(&reading(1.0));
        cache.add(&reading(2.0));
        assert_eq!(cache.latest().map(|e| e.price), Some(2.0));
    }

    #[test]
    fn evicts_oldest_once_full() {
        let capacity = 5;
        for extra in 0..4 {
            let cache = PriceCache::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                cache.add(&reading(i as f64));
            }
            assert_eq!(cache.len(), capacity.min(total));

            let prices: Vec<f64> = cache.history(capacity).iter().map(|e| e.price).collect();
            let expected: Vec<f64> = (total - capacity..total).rev().map(|i| i as f64).collect();
            assert_eq!(prices, expected);
        }
    }

    #[test]
    fn history_limit_larger_than_size_returns_all() {
        let cache = PriceCache::new(10);
        cache.add(&reading(1.0));
        cache.add(&reading(2.0));
        let prices: Vec<f64> = cache.history(100).iter().map(|e| e.price).collect();
        assert_eq!(prices, vec![2.0, 1.0]);
    }

    #[test]
    fn history_zero_limit_is_empty() {
        let cache = PriceCache::new(10);
        cache.add(&reading(1.0));
        assert!(cache.history(0).is_empty());
    }

    #[test]
    fn zero_capacity_keeps_latest() {
        let cache = PriceCache::new(0);
        cache.add(&reading(1.0));
        cache.add(&reading(2.0));
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.latest().map(|e| e.price), Some(2.0));
    }

    #[test]
    fn entries_are_copies() {
        let cache = PriceCache::new(2);
        let mut original = reading(10.0);
        cache.add(&original);
        original.price = 99.0;
        assert_eq!(cache.latest().map(|e| e.price), Some(10.0));
    }

    #[test]
    fn concurrent_readers_and_writer() {
        let cache = Arc::new(PriceCache::new(20));
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..1_000 {
                    cache.add(&reading(i as f64));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let history = cache.history(20);
                        assert!(history.len() <= 20);
                        // newest first, strictly decreasing insertion order
                        assert!(history.windows(2).all(|w| w[0].price > w[1].price));
                    }
                })
            })
            .collect();

        writer.join().expect("writer panicked");
        for reader in readers {
            reader.join().expect("reader panicked");
        }
        assert_eq!(cache.len(), 20);
        assert_eq!(cache.latest().map(|e| e.price), Some(999.0));
    }
}
