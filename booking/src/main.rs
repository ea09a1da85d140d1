//! Fieldbook expiry worker.
//!
//! Periodically expires overdue payment orders and applies the configured
//! disposition to their bookings. Request handling lives in the embedding
//! service; this binary only needs the database.

use anyhow::Context;
use fieldbook::aggregates::{BookingEnvironment, PaymentOrderEnvironment};
use fieldbook::config::Config;
use fieldbook::effects::EffectRunner;
use fieldbook::notifications::TracingNotifier;
use fieldbook::ExpirySweeper;
use fieldbook_core::environment::{Clock, SystemClock};
use fieldbook_postgres::PostgresBookingStore;
use fieldbook_runtime::metrics::MetricsServer;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldbook=info,fieldbook_postgres=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Fieldbook expiry worker");

    let config = Config::from_env();
    info!(
        disposition = ?config.booking.expiry_disposition,
        interval_secs = config.sweeper.interval_secs,
        batch_size = config.sweeper.batch_size,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let addr: SocketAddr = format!("{}:{}", config.metrics.host, config.metrics.port)
            .parse()
            .context("invalid metrics listen address")?;
        MetricsServer::new(addr).start()?;
    }

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = PostgresBookingStore::new(pool);
    store.migrate().await?;
    info!("Database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sweeper = ExpirySweeper::new(
        Arc::new(store),
        EffectRunner::new(Arc::new(TracingNotifier)),
        config.booking.expiry_disposition,
        BookingEnvironment::new(
            clock.clone(),
            config.booking.venue_offset(),
            config.booking.max_duration_minutes,
        ),
        PaymentOrderEnvironment::new(clock, config.payment.order_ttl()),
        config.sweeper.batch_size,
    );

    let mut ticker = tokio::time::interval(config.sweeper.interval());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweeper.sweep().await {
                    error!(error = %e, "Expiry sweep failed");
                }
            },
            () = &mut shutdown => break,
        }
    }

    info!("Fieldbook expiry worker stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
