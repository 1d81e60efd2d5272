use chrono::{DateTime, Local, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::Price;

/// Renders prices as currency strings with two decimals
#[derive(Debug, Clone)]
pub struct PriceFormatter {
    home_currency: String,
}

impl Default for PriceFormatter {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl PriceFormatter {
    pub fn new(home_currency: impl Into<String>) -> Self {
        Self {
            home_currency: home_currency.into().to_uppercase(),
        }
    }

    /// `$43,500.50` for the home currency, `EUR 43,500.50` for others.
    ///
    /// Codes that are not three ASCII letters fall back to
    /// `"<currency> <amount>"`.
    pub fn format(&self, price: &Price) -> String {
        if !is_iso_code(&price.currency) {
            return format!("{} {}", price.currency, price.amount);
        }

        let prefix = if price.currency.eq_ignore_ascii_case(&self.home_currency) {
            symbol_for(&self.home_currency)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} ", self.home_currency))
        } else {
            format!("{} ", price.currency.to_uppercase())
        };

        let (negative, digits) = group_amount(price.amount);
        if negative {
            format!("-{}{}", prefix, digits)
        } else {
            format!("{}{}", prefix, digits)
        }
    }
}

/// Medium time style in local time, e.g. `3:04:05 PM`
pub fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%-I:%M:%S %p")
        .to_string()
}

fn is_iso_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

fn symbol_for(code: &str) -> Option<&'static str> {
    match code {
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        "JPY" => Some("¥"),
        _ => None,
    }
}

/// Two decimals with `,` thousands separators; sign returned separately
fn group_amount(amount: Decimal) -> (bool, String) {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = format!("{:.2}", rounded.abs());

    let (int_part, frac_part) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3 + 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    (negative, format!("{}.{}", grouped, frac_part))
}
