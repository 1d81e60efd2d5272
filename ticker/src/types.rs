use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single observed quote from a venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Quoted amount (e.g., 43500.50)
    pub amount: Decimal,

    /// ISO currency code the amount is denominated in (e.g., "USD")
    pub currency: String,

    /// When the quote was observed
    pub timestamp: DateTime<Utc>,
}

impl Price {
    pub fn new(amount: Decimal, currency: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            timestamp,
        }
    }
}

/// One event emitted on a ticker stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickerState {
    /// Freshly fetched price, if this poll produced one
    pub latest: Option<Price>,

    /// Whether this poll failed
    pub is_error: bool,

    /// Human-readable failure description
    pub error_message: Option<String>,
}

impl TickerState {
    /// Successful poll carrying a new price
    pub fn price(price: Price) -> Self {
        Self {
            latest: Some(price),
            is_error: false,
            error_message: None,
        }
    }

    /// Failed poll; carries no price
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            latest: None,
            is_error: true,
            error_message: Some(message.into()),
        }
    }
}
