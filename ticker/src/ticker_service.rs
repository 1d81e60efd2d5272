//! Ticker Service
//!
//! Owns a polling loop over a [`QuoteSource`] and pushes one [`TickerState`]
//! per poll into a single-consumer stream.
//!
//! # Lifecycle
//! ```text
//! Idle --start--> Running --stop--> Stopped
//!                    |
//!                    +--too many consecutive failures--> ErrorTerminated
//! ```
//! An instance runs at most once. Once stopped or terminated its stream is
//! finished and a new instance is needed to poll again.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::PollSettings,
    error::FetchError,
    quote_source::QuoteSource,
    store::PriceStore,
    types::{Price, TickerState},
};

/// Polling service contract consumed by the reconciler
pub trait TickerService: Send + Sync {
    /// Begin polling. No-op while running or once stopped.
    fn start(&self);

    /// Stop polling and finish the stream. Safe to call repeatedly or
    /// before `start`.
    fn stop(&self);

    /// Hand out the consumer end of the stream. Only the first call
    /// returns `Some`.
    fn states(&self) -> Option<TickerStates>;

    /// Best-effort read of the last saved price
    fn load_persisted(&self) -> Option<Price>;
}

/// Consumer end of a ticker stream
#[derive(Debug)]
pub struct TickerStates {
    rx: mpsc::UnboundedReceiver<TickerState>,
}

impl TickerStates {
    /// Create a connected sender/stream pair
    pub fn channel() -> (mpsc::UnboundedSender<TickerState>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next event, or `None` once the stream has finished
    pub async fn next(&mut self) -> Option<TickerState> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Idle,
    Running,
    Stopped,
    ErrorTerminated,
}

/// Polling implementation of [`TickerService`]
pub struct DefaultTickerService {
    shared: Arc<Shared>,
    states: Mutex<Option<TickerStates>>,
    cancel: Mutex<Option<CancellationToken>>,
}

struct Shared {
    source: Arc<dyn QuoteSource>,
    store: Arc<dyn PriceStore>,
    settings: PollSettings,
    emitter: Mutex<Emitter>,
}

struct Emitter {
    sender: Option<mpsc::UnboundedSender<TickerState>>,
    status: ServiceStatus,
}

impl DefaultTickerService {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        store: Arc<dyn PriceStore>,
        settings: PollSettings,
    ) -> Self {
        let (sender, states) = TickerStates::channel();

        Self {
            shared: Arc::new(Shared {
                source,
                store,
                settings,
                emitter: Mutex::new(Emitter {
                    sender: Some(sender),
                    status: ServiceStatus::Idle,
                }),
            }),
            states: Mutex::new(Some(states)),
            cancel: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.shared.emitter.lock().status
    }
}

impl TickerService for DefaultTickerService {
    fn start(&self) {
        let mut cancel_slot = self.cancel.lock();

        {
            let mut emitter = self.shared.emitter.lock();
            match emitter.status {
                ServiceStatus::Idle => {}
                ServiceStatus::Running => {
                    debug!("Ticker service already running, ignoring start");
                    return;
                }
                status => {
                    debug!("Ticker service is {:?} and cannot be restarted", status);
                    return;
                }
            }

            let runtime = match tokio::runtime::Handle::try_current() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Cannot start ticker service outside a tokio runtime: {}", e);
                    return;
                }
            };

            let cancel = CancellationToken::new();
            runtime.spawn(poll_loop(self.shared.clone(), cancel.clone()));
            *cancel_slot = Some(cancel);
            emitter.status = ServiceStatus::Running;
        }

        info!(
            "Ticker service started (source: {}, interval: {:?})",
            self.shared.source.name(),
            self.shared.settings.interval
        );
    }

    fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }

        let mut emitter = self.shared.emitter.lock();
        emitter.sender = None;
        match emitter.status {
            ServiceStatus::Idle | ServiceStatus::Running => {
                emitter.status = ServiceStatus::Stopped;
                info!("Ticker service stopped");
            }
            ServiceStatus::Stopped | ServiceStatus::ErrorTerminated => {
                debug!("Ticker service already finished, ignoring stop");
            }
        }
    }

    fn states(&self) -> Option<TickerStates> {
        self.states.lock().take()
    }

    fn load_persisted(&self) -> Option<Price> {
        match self.shared.store.load() {
            Ok(price) => price,
            Err(e) => {
                warn!("Failed to load persisted price: {}", e);
                None
            }
        }
    }
}

impl Drop for DefaultTickerService {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.get_mut().take() {
            cancel.cancel();
        }
    }
}

impl Shared {
    /// Persist and emit one poll result.
    ///
    /// Returns `false` once the stream is closed and the loop should exit.
    fn publish(&self, result: Result<Price, FetchError>) -> bool {
        let mut emitter = self.emitter.lock();
        let Some(sender) = emitter.sender.as_ref() else {
            return false;
        };

        let state = match result {
            Ok(price) => {
                if let Err(e) = self.store.save(&price) {
                    warn!("Failed to persist price: {}", e);
                }
                TickerState::price(price)
            }
            Err(e) => TickerState::error(e.to_string()),
        };

        if sender.send(state).is_err() {
            info!("Ticker stream consumer dropped, stopping poll loop");
            emitter.sender = None;
            emitter.status = ServiceStatus::Stopped;
            return false;
        }

        true
    }

    fn terminate(&self, failures: u32) {
        let mut emitter = self.emitter.lock();
        if emitter.sender.take().is_some() {
            emitter.status = ServiceStatus::ErrorTerminated;
            error!("Ticker service giving up after {} consecutive failures", failures);
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = shared.source.fetch() => result,
        };

        match &result {
            Ok(price) => {
                consecutive_failures = 0;
                debug!("Fetched {} {}", price.amount, price.currency);
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!("Price fetch failed ({} in a row): {}", consecutive_failures, e);
            }
        }

        if !shared.publish(result) {
            break;
        }

        if let Some(max) = shared.settings.max_consecutive_failures {
            if consecutive_failures >= max {
                shared.terminate(consecutive_failures);
                break;
            }
        }
    }

    debug!("Poll loop exited");
}
