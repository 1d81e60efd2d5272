//! Polling price ticker
//!
//! ```text
//! QuoteSource → TickerService (poll loop, stream) → TickerReconciler (fold) → renderer
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod quote_source;
pub mod reconciler;
pub mod store;
pub mod ticker_service;
pub mod types;

pub use error::{FetchError, Result, TickerError};
pub use reconciler::{DisplayState, LiveServiceFactory, TickerReconciler, TickerServiceFactory};
pub use ticker_service::{DefaultTickerService, TickerService, TickerStates};
pub use types::{Price, TickerState};
