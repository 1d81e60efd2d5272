use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Coinbase spot endpoint used when no quote URL is configured
pub const DEFAULT_QUOTE_URL: &str = "https://api.coinbase.com/v2/prices/BTC-USD/spot";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Endpoint returning the current spot quote
    pub quote_url: String,

    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Polling settings for the ticker service
    pub poll: PollConfig,

    /// File holding the last successfully fetched price
    pub store_path: PathBuf,

    /// Currency rendered with its symbol instead of its code
    pub home_currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Delay between two polls (seconds)
    pub interval_secs: u64,

    /// Consecutive fetch failures before the loop gives up (0 = never)
    pub max_consecutive_failures: u32,
}

/// Runtime polling parameters handed to the ticker service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_consecutive_failures: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_consecutive_failures: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            quote_url: DEFAULT_QUOTE_URL.to_string(),
            request_timeout_secs: 10,
            poll: PollConfig {
                interval_secs: 10,
                max_consecutive_failures: 0,
            },
            store_path: PathBuf::from("last_price.json"),
            home_currency: "USD".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Every variable is optional; unset ones keep their default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let interval_secs = parse_or("TICKER_POLL_INTERVAL_SECS", &lookup, defaults.poll.interval_secs)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "TICKER_POLL_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        Ok(Config {
            quote_url: lookup("TICKER_QUOTE_URL").unwrap_or(defaults.quote_url),
            request_timeout_secs: parse_or(
                "TICKER_REQUEST_TIMEOUT_SECS",
                &lookup,
                defaults.request_timeout_secs,
            )?,
            poll: PollConfig {
                interval_secs,
                max_consecutive_failures: parse_or(
                    "TICKER_MAX_CONSECUTIVE_FAILURES",
                    &lookup,
                    defaults.poll.max_consecutive_failures,
                )?,
            },
            store_path: lookup("TICKER_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            home_currency: lookup("TICKER_HOME_CURRENCY")
                .map(|code| code.trim().to_uppercase())
                .unwrap_or(defaults.home_currency),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll.interval_secs),
            max_consecutive_failures: match self.poll.max_consecutive_failures {
                0 => None,
                n => Some(n),
            },
        }
    }
}

fn parse_or<T: FromStr>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> std::result::Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}
