//! Sigwatch - watch an Expert Advisor license for new trading signals.
//!
//! Polls the signal service for the license in `SIGWATCH_LICENSE_KEY` and
//! logs every signal it finds until interrupted.

use sigwatch::{Config, Error, HttpSignalApi, Result, SignalPoller};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let config = Config::load_or_default()?;

    let license_key = std::env::var("SIGWATCH_LICENSE_KEY")
        .map_err(|_| Error::config("SIGWATCH_LICENSE_KEY is not set"))?;

    let api = Arc::new(HttpSignalApi::new(config.api.clone())?);
    let poller = SignalPoller::new(api, config);

    poller
        .start_polling(
            license_key,
            |signal| {
                tracing::info!(
                    id = %signal.id,
                    ea = %signal.ea_name,
                    asset = %signal.asset,
                    action = %signal.action,
                    price = %signal.price,
                    "New signal"
                );
            },
            |message| {
                tracing::warn!("Polling error: {message}");
            },
        )
        .await?;

    // Poll until interrupted
    tokio::signal::ctrl_c().await?;
    poller.stop_polling().await;

    Ok(())
}
