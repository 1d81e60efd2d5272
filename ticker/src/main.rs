use btc_ticker::{
    config::Config,
    format::PriceFormatter,
    reconciler::{LiveServiceFactory, TickerReconciler},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting BTC ticker...");

    let config = Config::from_env()?;
    tracing::info!(
        "Polling {} every {}s (last price kept in {})",
        config.quote_url,
        config.poll.interval_secs,
        config.store_path.display()
    );

    let mut reconciler = TickerReconciler::new(
        LiveServiceFactory::from_config(&config)?,
        PriceFormatter::new(config.home_currency.clone()),
    );
    let mut updates = reconciler.subscribe();

    reconciler.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                println!("{:>16}  {}", state.price_text(), state.status_text());
                if !state.is_running() {
                    break;
                }
            }
        }
    }

    reconciler.stop();
    println!("{:>16}  {}", reconciler.price_text(), reconciler.status_text());

    Ok(())
}
