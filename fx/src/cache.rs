//! Short-lived memory of fetched exchange rates.
//!
//! A rate is served from here until it is older than the configured TTL.
//! Failed lookups are never stored, so an outage is retried on the next call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::provider::CurrencyPair;

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

impl CachedRate {
    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Rate cache limits.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// How long a fetched rate stays usable.
    pub ttl: Duration,
    /// Pairs remembered at once; the oldest is dropped beyond this.
    pub capacity: usize,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 256,
        }
    }
}

/// Concurrent TTL cache keyed by currency pair.
pub struct RateCache {
    rates: DashMap<CurrencyPair, CachedRate>,
    config: RateCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RateCache {
    pub fn new(config: RateCacheConfig) -> Self {
        Self {
            rates: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh rate for `pair`, if any. Stale entries are dropped on sight.
    pub fn lookup(&self, pair: &CurrencyPair) -> Option<Decimal> {
        let fresh = self
            .rates
            .get(pair)
            .map(|cached| (cached.rate, cached.age() < self.config.ttl));

        match fresh {
            Some((rate, true)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(rate)
            }
            Some((_, false)) => {
                debug!(pair = %pair, "Cached rate expired");
                self.rates.remove(pair);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remember a freshly fetched rate.
    pub fn store(&self, pair: CurrencyPair, rate: Decimal) {
        if !self.rates.contains_key(&pair) && self.rates.len() >= self.config.capacity {
            self.make_room();
        }
        self.rates.insert(
            pair,
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Forget every rate.
    pub fn purge(&self) {
        self.rates.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.rates.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn make_room(&self) {
        let ttl = self.config.ttl;
        self.rates.retain(|_, cached| cached.age() < ttl);
        if self.rates.len() < self.config.capacity {
            return;
        }

        let oldest = self
            .rates
            .iter()
            .min_by_key(|entry| entry.value().fetched_at)
            .map(|entry| *entry.key());
        if let Some(pair) = oldest {
            debug!(pair = %pair, "Evicting oldest cached rate");
            self.rates.remove(&pair);
        }
    }
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new(RateCacheConfig::default())
    }
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
