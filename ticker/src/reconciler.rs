//! State Reconciler
//!
//! Folds the events of one [`TickerService`] run, plus the persisted price,
//! into the [`DisplayState`] a renderer shows.
//!
//! # Architecture
//! ```text
//! TickerServiceFactory → TickerService ──states──> consumer task ──fold──> watch<DisplayState> → renderer
//!                              └──load_persisted──────────────────fold──┘
//! ```
//!
//! # Ownership
//! The reconciler owns the service and the consumer task of the current run
//! and tears both down on `stop`, on the next `start`, and on drop. The task
//! never owns the reconciler; it only holds the publishing end of the watch
//! channel and the generation number of its run. Every write checks that
//! generation under the channel lock, so a task that outlives its run can
//! never touch the state of a later one.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, PollSettings},
    error::Result,
    format::{PriceFormatter, format_time},
    quote_source::{QuoteSource, ReqwestTransport, SpotQuoteSource},
    store::{FilePriceStore, PriceStore},
    ticker_service::{DefaultTickerService, TickerService, TickerStates},
    types::{Price, TickerState},
};

pub const PLACEHOLDER: &str = "--";
pub const STATUS_FETCHING: &str = "Fetching latest price...";
pub const STATUS_STOPPED: &str = "Service stopped";
pub const STATUS_WAITING: &str = "Waiting for price...";
pub const STATUS_FETCH_FAILED: &str = "Unable to fetch price.";

/// What the renderer shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    price_text: String,
    status_text: String,
    is_running: bool,
    is_error: bool,
    last_known_price: Option<Price>,
    generation: u64,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            price_text: PLACEHOLDER.to_string(),
            status_text: STATUS_STOPPED.to_string(),
            is_running: false,
            is_error: false,
            last_known_price: None,
            generation: 0,
        }
    }
}

impl DisplayState {
    pub fn price_text(&self) -> &str {
        &self.price_text
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn last_known_price(&self) -> Option<&Price> {
        self.last_known_price.as_ref()
    }

    /// Price half of the fold; leaves status and flags alone.
    pub fn apply_price(&mut self, latest: Option<&Price>, formatter: &PriceFormatter) {
        if let Some(price) = latest {
            self.last_known_price = Some(price.clone());
            self.price_text = formatter.format(price);
        } else if self.last_known_price.is_none() {
            self.price_text = PLACEHOLDER.to_string();
        }
    }

    /// Fold one stream event into the state
    pub fn apply(&mut self, event: &TickerState, formatter: &PriceFormatter) {
        self.apply_price(event.latest.as_ref(), formatter);

        if event.is_error {
            self.is_error = true;
            self.status_text = event
                .error_message
                .clone()
                .unwrap_or_else(|| STATUS_FETCH_FAILED.to_string());
        } else {
            self.is_error = false;
            self.status_text = match event.latest.as_ref().or(self.last_known_price.as_ref()) {
                Some(price) => format!("Last updated {}", format_time(&price.timestamp)),
                None => STATUS_WAITING.to_string(),
            };
        }
    }

    fn begin(&mut self, generation: u64) {
        self.generation = generation;
        self.is_running = true;
        self.is_error = false;
        self.status_text = STATUS_FETCHING.to_string();
    }

    fn end(&mut self) {
        self.is_running = false;
        self.is_error = false;
        self.status_text = STATUS_STOPPED.to_string();
    }

    fn is_live(&self, generation: u64) -> bool {
        self.is_running && self.generation == generation
    }

    /// Stream of `generation` finished on its own. Returns whether anything changed.
    fn finish(&mut self, generation: u64) -> bool {
        if !self.is_live(generation) {
            return false;
        }

        self.is_running = false;
        if !self.is_error {
            self.status_text = STATUS_STOPPED.to_string();
        }
        true
    }
}

/// Builds one fresh [`TickerService`] per run
pub trait TickerServiceFactory: Send + Sync {
    fn make_service(&self) -> Arc<dyn TickerService>;
}

impl<F> TickerServiceFactory for F
where
    F: Fn() -> Arc<dyn TickerService> + Send + Sync,
{
    fn make_service(&self) -> Arc<dyn TickerService> {
        self()
    }
}

/// Factory producing polling services over a live quote source
pub struct LiveServiceFactory {
    source: Arc<dyn QuoteSource>,
    store: Arc<dyn PriceStore>,
    settings: PollSettings,
}

impl LiveServiceFactory {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        store: Arc<dyn PriceStore>,
        settings: PollSettings,
    ) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }

    /// Spot quotes over HTTP, last price kept in a JSON file
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        let source = SpotQuoteSource::new(transport, config.quote_url.clone(), config.request_timeout());

        Ok(Self::new(
            Arc::new(source),
            Arc::new(FilePriceStore::new(config.store_path.clone())),
            config.poll_settings(),
        ))
    }
}

impl TickerServiceFactory for LiveServiceFactory {
    fn make_service(&self) -> Arc<dyn TickerService> {
        Arc::new(DefaultTickerService::new(
            self.source.clone(),
            self.store.clone(),
            self.settings,
        ))
    }
}

struct ActiveRun {
    service: Arc<dyn TickerService>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Drives ticker runs and publishes the resulting [`DisplayState`]
///
/// # Example
/// ```rust,no_run
/// # use btc_ticker::{config::Config, reconciler::{LiveServiceFactory, TickerReconciler}, format::PriceFormatter};
/// # async fn run() -> btc_ticker::error::Result<()> {
/// let config = Config::from_env()?;
/// let mut reconciler = TickerReconciler::new(
///     LiveServiceFactory::from_config(&config)?,
///     PriceFormatter::new(config.home_currency.clone()),
/// );
/// let mut updates = reconciler.subscribe();
///
/// reconciler.start();
/// while updates.changed().await.is_ok() {
///     let state = updates.borrow_and_update().clone();
///     println!("{} ({})", state.price_text(), state.status_text());
/// }
/// # Ok(())
/// # }
/// ```
pub struct TickerReconciler<F: TickerServiceFactory> {
    factory: F,
    formatter: PriceFormatter,
    display: Arc<watch::Sender<DisplayState>>,
    run: Option<ActiveRun>,
    generation: u64,
}

impl<F: TickerServiceFactory> TickerReconciler<F> {
    pub fn new(factory: F, formatter: PriceFormatter) -> Self {
        let (display, _) = watch::channel(DisplayState::default());

        Self {
            factory,
            formatter,
            display: Arc::new(display),
            run: None,
            generation: 0,
        }
    }

    /// Start a new run. No-op while running.
    ///
    /// # Panics
    /// When called outside a tokio runtime.
    pub fn start(&mut self) {
        if self.display.borrow().is_running {
            debug!("Ticker already running, ignoring start");
            return;
        }

        self.teardown();

        let service = self.factory.make_service();
        let persisted = service.load_persisted();

        self.generation += 1;
        let generation = self.generation;
        let formatter = &self.formatter;
        self.display.send_modify(|state| {
            state.apply_price(persisted.as_ref(), formatter);
            state.begin(generation);
        });

        let cancel = CancellationToken::new();
        let task = match service.states() {
            Some(states) => Some(tokio::spawn(consume(
                states,
                self.display.clone(),
                self.formatter.clone(),
                generation,
                cancel.clone(),
            ))),
            None => {
                warn!("Ticker service handed out no stream");
                self.display.send_if_modified(|state| state.finish(generation));
                None
            }
        };

        service.start();
        self.run = Some(ActiveRun {
            service,
            cancel,
            task,
        });

        info!("Ticker run {} started", generation);
    }

    /// Stop the current run. No-op while idle.
    pub fn stop(&mut self) {
        if !self.display.borrow().is_running {
            debug!("Ticker not running, ignoring stop");
            return;
        }

        self.teardown();
        self.display.send_modify(DisplayState::end);

        info!("Ticker run {} stopped", self.generation);
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.subscribe()
    }

    pub fn snapshot(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    pub fn price_text(&self) -> String {
        self.display.borrow().price_text.clone()
    }

    pub fn status_text(&self) -> String {
        self.display.borrow().status_text.clone()
    }

    pub fn is_running(&self) -> bool {
        self.display.borrow().is_running
    }

    pub fn is_error(&self) -> bool {
        self.display.borrow().is_error
    }

    fn teardown(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
            if let Some(task) = run.task {
                task.abort();
            }
            run.service.stop();
        }
    }
}

impl<F: TickerServiceFactory> Drop for TickerReconciler<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn consume(
    mut states: TickerStates,
    display: Arc<watch::Sender<DisplayState>>,
    formatter: PriceFormatter,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = states.next() => event,
        };

        let Some(event) = event else { break };

        display.send_if_modified(|state| {
            if !state.is_live(generation) {
                return false;
            }
            state.apply(&event, &formatter);
            true
        });
    }

    if display.send_if_modified(|state| state.finish(generation)) {
        info!("Ticker stream {} finished", generation);
    }
}
