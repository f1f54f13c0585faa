//! Engine configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use fundflow_fx::{ExchangeRateApiConfig, RateCacheConfig, RateServiceConfig};
use rust_decimal::Decimal;
use thiserror::Error;

/// What happens to the rounding residual of a distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemainderPolicy {
    /// Residual goes to the rule with the largest percentage (lowest id on
    /// ties), so credits add up to the received amount exactly.
    #[default]
    LargestShare,
    /// Shares are credited as computed; the residual stays unallocated.
    Drift,
}

impl RemainderPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemainderPolicy::LargestShare => "largest-share",
            RemainderPolicy::Drift => "drift",
        }
    }
}

impl fmt::Display for RemainderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemainderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "largest-share" | "largest_share" => Ok(RemainderPolicy::LargestShare),
            "drift" => Ok(RemainderPolicy::Drift),
            other => Err(format!("unknown remainder policy '{}'", other)),
        }
    }
}

/// Exchange-rate service settings.
#[derive(Clone)]
pub struct RateConfig {
    /// Credential for the HTTP rate service; never logged.
    pub api_key: Option<String>,
    /// Versioned API root.
    pub api_url: String,
    /// Upper bound on one lookup.
    pub timeout: Duration,
    /// How long a fetched rate is reused. Zero disables caching.
    pub cache_ttl: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: fundflow_fx::http::DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for RateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fee percentage, `2.0` means 2 %.
    pub fee_percentage: Decimal,
    /// Distribution rounding residual handling.
    pub remainder_policy: RemainderPolicy,
    /// Bound on acquiring all row locks of one transfer.
    pub lock_timeout: Duration,
    /// Rate lookup settings.
    pub rates: RateConfig,
    /// PostgreSQL URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_percentage: Decimal::new(20, 1),
            remainder_policy: RemainderPolicy::default(),
            lock_timeout: Duration::from_secs(10),
            rates: RateConfig::default(),
            database_url: None,
        }
    }
}

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0}")]
    Constraint(String),
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(fee) = lookup("FUNDFLOW_FEE_PERCENT") {
            config.fee_percentage = parse("FUNDFLOW_FEE_PERCENT", &fee)?;
        }

        if let Some(policy) = lookup("FUNDFLOW_REMAINDER_POLICY") {
            config.remainder_policy = parse("FUNDFLOW_REMAINDER_POLICY", &policy)?;
        }

        if let Some(ms) = lookup("FUNDFLOW_LOCK_TIMEOUT_MS") {
            config.lock_timeout = Duration::from_millis(parse("FUNDFLOW_LOCK_TIMEOUT_MS", &ms)?);
        }

        if let Some(key) = lookup("EXCHANGERATE_API_KEY") {
            if !key.trim().is_empty() {
                config.rates.api_key = Some(key.trim().to_string());
            }
        }

        if let Some(url) = lookup("EXCHANGERATE_API_URL") {
            config.rates.api_url = url;
        }

        if let Some(ms) = lookup("FUNDFLOW_RATE_TIMEOUT_MS") {
            config.rates.timeout = Duration::from_millis(parse("FUNDFLOW_RATE_TIMEOUT_MS", &ms)?);
        }

        if let Some(secs) = lookup("FUNDFLOW_RATE_CACHE_TTL_SECS") {
            config.rates.cache_ttl =
                Duration::from_secs(parse("FUNDFLOW_RATE_CACHE_TTL_SECS", &secs)?);
        }

        if let Some(url) = lookup("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fee_percentage < Decimal::ZERO || self.fee_percentage >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::Constraint(format!(
                "fee percentage {} must be at least 0 and below 100",
                self.fee_percentage
            )));
        }

        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Constraint(
                "lock timeout cannot be 0".to_string(),
            ));
        }

        if self.rates.timeout.is_zero() {
            return Err(ConfigError::Constraint(
                "rate lookup timeout cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings for the rate service front.
    pub fn rate_service_config(&self) -> RateServiceConfig {
        RateServiceConfig {
            lookup_timeout: self.rates.timeout,
            cache: RateCacheConfig {
                ttl: self.rates.cache_ttl,
                ..Default::default()
            },
            use_cache: !self.rates.cache_ttl.is_zero(),
        }
    }

    /// Settings for the HTTP rate provider. Requires an API key.
    pub fn exchange_rate_api_config(&self) -> Result<ExchangeRateApiConfig, ConfigError> {
        let api_key = self
            .rates
            .api_key
            .clone()
            .ok_or(ConfigError::Missing("EXCHANGERATE_API_KEY"))?;
        Ok(ExchangeRateApiConfig {
            base_url: self.rates.api_url.clone(),
            api_key,
            timeout: self.rates.timeout,
        })
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]).unwrap();

        assert_eq!(config.fee_percentage, dec!(2.0));
        assert_eq!(config.remainder_policy, RemainderPolicy::LargestShare);
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert!(config.database_url.is_none());
        assert!(config.rate_service_config().use_cache);
        assert_eq!(
            config.exchange_rate_api_config().unwrap_err(),
            ConfigError::Missing("EXCHANGERATE_API_KEY")
        );
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FUNDFLOW_FEE_PERCENT", "1.5"),
            ("FUNDFLOW_REMAINDER_POLICY", "drift"),
            ("FUNDFLOW_LOCK_TIMEOUT_MS", "250"),
            ("EXCHANGERATE_API_KEY", "abc"),
            ("FUNDFLOW_RATE_CACHE_TTL_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.fee_percentage, dec!(1.5));
        assert_eq!(config.remainder_policy, RemainderPolicy::Drift);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert!(!config.rate_service_config().use_cache);
        assert_eq!(config.exchange_rate_api_config().unwrap().api_key, "abc");
        assert!(!format!("{:?}", config).contains("abc"));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            load(&[("FUNDFLOW_FEE_PERCENT", "two")]),
            Err(ConfigError::Invalid { key: "FUNDFLOW_FEE_PERCENT", .. })
        ));
        assert!(matches!(
            load(&[("FUNDFLOW_FEE_PERCENT", "100")]),
            Err(ConfigError::Constraint(_))
        ));
        assert!(matches!(
            load(&[("FUNDFLOW_REMAINDER_POLICY", "round-robin")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(load(&[("FUNDFLOW_LOCK_TIMEOUT_MS", "0")]).is_err());
    }
}
