//! HTTP provider for the exchangerate-api.com v6 protocol.
//!
//! `GET {base_url}/{api_key}/latest/{FROM}` answers with
//! `{"result": "success", "conversion_rates": {"EUR": 0.9, ...}}` or
//! `{"result": "error", "error-type": "invalid-key"}`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use fundflow_common::Currency;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://v6.exchangerate-api.com/v6";

/// Connection settings for [`ExchangeRateApiProvider`].
#[derive(Clone)]
pub struct ExchangeRateApiConfig {
    /// Versioned API root, without trailing slash.
    pub base_url: String,
    /// API credential, part of the request path.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ExchangeRateApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for ExchangeRateApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRateApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Rate provider backed by the exchangerate-api.com REST API.
pub struct ExchangeRateApiProvider {
    client: reqwest::Client,
    config: ExchangeRateApiConfig,
}

impl ExchangeRateApiProvider {
    /// Create a provider; fails only if the HTTP client cannot be built.
    pub fn new(config: ExchangeRateApiConfig) -> FxResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FxError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, from: Currency) -> String {
        format!(
            "{}/{}/latest/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_key,
            from.code()
        )
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiProvider {
    fn name(&self) -> &str {
        "EXCHANGERATE_API"
    }

    async fn rate(&self, from: Currency, to: Currency) -> FxResult<Decimal> {
        let response = self.client.get(self.url(from)).send().await.map_err(|e| {
            // reqwest errors embed the URL, which carries the key
            let e = e.without_url();
            warn!(from = %from, to = %to, error = %e, "Rate request failed");
            FxError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(from = %from, to = %to, status = %status, "Rate service rejected request");
            return Err(FxError::Service(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| {
            let e = e.without_url();
            if e.is_timeout() {
                FxError::Network(e.to_string())
            } else {
                FxError::Parse(e.to_string())
            }
        })?;

        let rate = parse_response(&body, to)?;
        debug!(from = %from, to = %to, rate = %rate, "Fetched rate");
        Ok(rate)
    }
}

/// Extract the `target` rate from a v6 `latest` response body.
pub fn parse_response(body: &str, target: Currency) -> FxResult<Decimal> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| FxError::Parse(format!("invalid JSON: {}", e)))?;

    match json.get("result").and_then(Value::as_str) {
        Some("success") => {}
        Some(_) => {
            let error_type = json
                .get("error-type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(FxError::Service(error_type.to_string()));
        }
        None => return Err(FxError::Parse("missing 'result' field".to_string())),
    }

    let rate = json
        .get("conversion_rates")
        .and_then(|rates| rates.get(target.code()))
        .ok_or_else(|| {
            FxError::Parse(format!("currency '{}' not found in response", target))
        })?;

    decimal_from_json(rate)
}

fn decimal_from_json(value: &Value) -> FxResult<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(FxError::Parse(format!("rate is not a number: {}", other))),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| FxError::Parse(format!("rate '{}' is not a decimal", text)))
}
