use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btc_ticker::{
    DefaultTickerService, DisplayState, FetchError, LiveServiceFactory, Price, TickerReconciler,
    TickerService,
    config::PollSettings,
    format::PriceFormatter,
    quote_source::QuoteSource,
    reconciler::{PLACEHOLDER, STATUS_FETCHING, STATUS_STOPPED},
    store::{FilePriceStore, MemoryPriceStore, PriceStore},
};
use chrono::Utc;
use rust_decimal::Decimal;

/// Fails every `fail_every`-th call, otherwise quotes 43500.50
struct FlakySource {
    calls: AtomicUsize,
    fail_every: usize,
}

impl FlakySource {
    fn new(fail_every: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_every,
        }
    }
}

#[async_trait]
impl QuoteSource for FlakySource {
    async fn fetch(&self) -> Result<Price, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            return Err(FetchError::Transport("Network down".to_string()));
        }
        Ok(Price::new(Decimal::new(4_350_050, 2), "USD", Utc::now()))
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(20),
        max_consecutive_failures: None,
    }
}

async fn wait_for(
    reconciler: &TickerReconciler<LiveServiceFactory>,
    condition: impl FnMut(&DisplayState) -> bool,
) {
    let mut updates = reconciler.subscribe();
    tokio::time::timeout(Duration::from_secs(2), updates.wait_for(condition))
        .await
        .expect("timed out waiting for display state")
        .expect("display channel closed");
}

#[tokio::test]
async fn test_end_to_end_start_fetch_stop() {
    let store = Arc::new(MemoryPriceStore::new());
    let factory = LiveServiceFactory::new(Arc::new(FlakySource::new(2)), store.clone(), settings());
    let mut reconciler = TickerReconciler::new(factory, PriceFormatter::default());

    reconciler.start();
    assert_eq!(reconciler.price_text(), PLACEHOLDER);
    assert_eq!(reconciler.status_text(), STATUS_FETCHING);
    assert!(reconciler.is_running());

    wait_for(&reconciler, |state| state.price_text() == "$43,500.50").await;
    assert!(reconciler.status_text().starts_with("Last updated"));

    wait_for(&reconciler, DisplayState::is_error).await;
    assert_eq!(reconciler.status_text(), "Network error: Network down");
    assert_eq!(reconciler.price_text(), "$43,500.50");

    reconciler.stop();
    let after_stop = reconciler.snapshot();
    assert!(!after_stop.is_running());
    assert!(!after_stop.is_error());
    assert_eq!(after_stop.status_text(), STATUS_STOPPED);
    assert!(after_stop.last_known_price().is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reconciler.snapshot(), after_stop);
    assert!(store.load().unwrap().is_some());
}

#[tokio::test]
async fn test_persisted_price_is_shown_before_first_live_quote() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilePriceStore::new(dir.path().join("last_price.json"));
    store
        .save(&Price::new(Decimal::from(42_000), "USD", Utc::now()))
        .unwrap();

    let factory = LiveServiceFactory::new(Arc::new(FlakySource::new(1)), Arc::new(store), settings());
    let mut reconciler = TickerReconciler::new(factory, PriceFormatter::default());

    reconciler.start();
    assert_eq!(reconciler.price_text(), "$42,000.00");

    wait_for(&reconciler, DisplayState::is_error).await;
    assert_eq!(reconciler.price_text(), "$42,000.00");
    reconciler.stop();
}

#[tokio::test]
async fn test_escalation_ends_run_and_keeps_error_visible() {
    let factory = LiveServiceFactory::new(
        Arc::new(FlakySource::new(1)),
        Arc::new(MemoryPriceStore::new()),
        PollSettings {
            interval: Duration::from_millis(5),
            max_consecutive_failures: Some(3),
        },
    );
    let mut reconciler = TickerReconciler::new(factory, PriceFormatter::default());

    reconciler.start();
    wait_for(&reconciler, |state| !state.is_running()).await;

    assert!(reconciler.is_error());
    assert_eq!(reconciler.status_text(), "Network error: Network down");
    assert_eq!(reconciler.price_text(), PLACEHOLDER);

    reconciler.start();
    assert!(reconciler.is_running());
    assert_eq!(reconciler.status_text(), STATUS_FETCHING);
    reconciler.stop();
}

#[tokio::test]
async fn test_closure_factory_builds_one_service_per_run() {
    let made = Arc::new(AtomicUsize::new(0));
    let counter = made.clone();
    let store: Arc<dyn PriceStore> = Arc::new(MemoryPriceStore::new());
    let factory = move || -> Arc<dyn TickerService> {
        counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(DefaultTickerService::new(
            Arc::new(FlakySource::new(usize::MAX)),
            store.clone(),
            settings(),
        ))
    };
    let mut reconciler = TickerReconciler::new(factory, PriceFormatter::default());

    reconciler.start();
    reconciler.start();
    reconciler.stop();
    reconciler.stop();
    reconciler.start();
    reconciler.stop();

    assert_eq!(made.load(Ordering::SeqCst), 2);
}
