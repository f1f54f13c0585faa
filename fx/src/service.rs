//! Rate lookup front used by the transaction engine.

use std::sync::Arc;
use std::time::Duration;

use fundflow_common::{quantize, Currency, RATE_SCALE};
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, RateCache, RateCacheConfig};
use crate::error::{FxError, FxResult};
use crate::provider::{CurrencyPair, RateProvider};

/// Configuration for the rate service.
#[derive(Debug, Clone)]
pub struct RateServiceConfig {
    /// Upper bound on one provider lookup.
    pub lookup_timeout: Duration,
    /// Cache configuration.
    pub cache: RateCacheConfig,
    /// Whether to use cached rates.
    pub use_cache: bool,
}

impl Default for RateServiceConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            cache: RateCacheConfig::default(),
            use_cache: true,
        }
    }
}

/// Resolves exchange rates at [`RATE_SCALE`] precision.
pub struct RateService {
    provider: Arc<dyn RateProvider>,
    cache: RateCache,
    config: RateServiceConfig,
}

impl RateService {
    /// Create a new rate service over `provider`.
    pub fn new(provider: Arc<dyn RateProvider>, config: RateServiceConfig) -> Self {
        Self {
            provider,
            cache: RateCache::new(config.cache.clone()),
            config,
        }
    }

    /// Rate to multiply an amount in `from` by to obtain `to`.
    ///
    /// Identical currencies return exactly 1 without touching the provider.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn rate(&self, from: Currency, to: Currency) -> FxResult<Decimal> {
        if from == to {
            return Ok(quantize(Decimal::ONE, RATE_SCALE));
        }

        let pair = CurrencyPair::new(from, to);

        if self.config.use_cache {
            if let Some(cached) = self.cache.lookup(&pair) {
                debug!(pair = %pair, "Using cached rate");
                return Ok(cached);
            }
        }

        let raw = tokio::time::timeout(self.config.lookup_timeout, self.provider.rate(from, to))
            .await
            .map_err(|_| {
                warn!(pair = %pair, timeout = ?self.config.lookup_timeout, "Rate lookup timed out");
                FxError::Network(format!(
                    "rate lookup for {} timed out after {:?}",
                    pair, self.config.lookup_timeout
                ))
            })??;

        let rate = quantize(raw, RATE_SCALE);
        if rate <= Decimal::ZERO {
            return Err(FxError::Parse(format!(
                "non-positive rate {} for {}",
                raw, pair
            )));
        }

        if self.config.use_cache {
            self.cache.store(pair, rate);
        }

        Ok(rate)
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached rate.
    pub fn clear_cache(&self) {
        self.cache.purge();
    }
}
