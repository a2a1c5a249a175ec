//! API server entry point.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use booking_store::{BookingStore, InMemoryBookingStore, PostgresBookingStore};
use common::Money;
use saga::{DanglingBookingDetector, InMemorySeatPriceLookup, MessageWorker};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the HTTP server, the message worker and the dangling booking
/// detector on `store` until a shutdown signal arrives.
async fn serve<S: BookingStore + Clone + 'static>(
    config: &Config,
    store: S,
) -> Result<(), Box<dyn Error>> {
    let pricing = InMemorySeatPriceLookup::with_default_price(Money::from_cents(
        config.default_seat_price_cents,
    ));
    let (state, receiver) =
        api::create_default_state(store.clone(), config.reservation_settings(), pricing);

    let worker = Arc::new(MessageWorker::new(store.clone(), config.retry_policy()));
    let worker_task = tokio::spawn(Arc::clone(&worker).run(receiver));

    let detector = DanglingBookingDetector::new(
        store,
        state.clock.clone(),
        chrono::Duration::seconds(config.dangling_grace_secs),
    );
    let scan_period = Duration::from_secs(config.dangling_scan_interval_secs.max(1));
    let detector_task = tokio::spawn(detector.run(scan_period));

    let app = api::create_app(state);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The router owned the last bus senders; the worker drains what is queued.
    detector_task.abort();
    worker_task.await?;

    let dead_letters = worker.dead_letters();
    if !dead_letters.is_empty() {
        tracing::warn!(count = dead_letters.len(), "messages left in dead letters");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Pick the storage engine and start serving
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresBookingStore::connect(url, DATABASE_MAX_CONNECTIONS).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL booking store");
            serve(&config, store).await?;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory booking store");
            serve(&config, InMemoryBookingStore::new()).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
