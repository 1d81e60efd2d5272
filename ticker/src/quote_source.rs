//! Quote Sources
//!
//! A quote source performs exactly one fetch of the current price from an
//! external venue. Sources are stateless and safe to call concurrently.
//!
//! ```text
//! HttpTransport (bytes, status) → SpotQuoteSource (decode) → Price
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{error::FetchError, types::Price};

/// One-shot price fetch against an external venue
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch(&self) -> Result<Price, FetchError>;

    /// Venue name used in logs
    fn name(&self) -> &str;
}

/// Raw HTTP GET capability
///
/// Implementations must fail on timeout, connection failure, or any
/// non-success status.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<(Vec<u8>, u16), FetchError>;
}

/// `reqwest` backed transport
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("btc-ticker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<(Vec<u8>, u16), FetchError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Transport(e.to_string())
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_err)?;
        Ok((body.to_vec(), status.as_u16()))
    }
}

/// Spot price payload, e.g. `{"data": {"base": "BTC", "currency": "USD", "amount": "43500.50"}}`
#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: String,
    currency: String,
}

/// Quote source decoding a spot-price endpoint
pub struct SpotQuoteSource<T> {
    transport: T,
    url: String,
    timeout: Duration,
}

impl<T: HttpTransport> SpotQuoteSource<T> {
    pub fn new(transport: T, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout,
        }
    }

    fn decode(body: &[u8]) -> Result<Price, FetchError> {
        let response: SpotResponse =
            serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let amount = Decimal::from_str(response.data.amount.trim())
            .map_err(|e| FetchError::Decode(format!("amount {:?}: {}", response.data.amount, e)))?;
        if amount <= Decimal::ZERO {
            return Err(FetchError::InvalidPrice(amount.to_string()));
        }

        let currency = response.data.currency.trim().to_uppercase();
        if currency.is_empty() {
            return Err(FetchError::Decode("empty currency".to_string()));
        }

        Ok(Price::new(amount, currency, Utc::now()))
    }
}

#[async_trait]
impl<T: HttpTransport> QuoteSource for SpotQuoteSource<T> {
    async fn fetch(&self) -> Result<Price, FetchError> {
        debug!("Fetching spot quote from {}", self.url);

        let (body, status) = self.transport.get(&self.url, self.timeout).await?;
        let price = Self::decode(&body)?;

        debug!("Spot quote ({}): {} {}", status, price.amount, price.currency);
        Ok(price)
    }

    fn name(&self) -> &str {
        "spot"
    }
}

/// Tries each source in order and returns the first price obtained
pub struct FallbackQuoteSource {
    sources: Vec<Arc<dyn QuoteSource>>,
}

impl FallbackQuoteSource {
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl QuoteSource for FallbackQuoteSource {
    async fn fetch(&self) -> Result<Price, FetchError> {
        let mut last_error = FetchError::Transport("No quote sources configured".to_string());

        for source in &self.sources {
            match source.fetch().await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    warn!("{} quote failed: {}", source.name(), e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
