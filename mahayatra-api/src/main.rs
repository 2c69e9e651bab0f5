use anyhow::Context;
use mahayatra_api::{app, AppState, AuthConfig};
use mahayatra_booking::{BookingRepository, InMemoryBookingRepository};
use mahayatra_core::{InMemorySeatStore, LockManager, SeatStore};
use mahayatra_store::app_config::{Config, StorageBackend};
use mahayatra_store::{DbClient, PgBookingRepository, RedisSeatStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mahayatra_api=debug,mahayatra_core=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Mahayatra API on port {}", config.server.port);

    let seats: Arc<dyn SeatStore> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory seat store; holds are not shared between instances");
            Arc::new(InMemorySeatStore::new())
        }
        StorageBackend::Redis => Arc::new(
            RedisSeatStore::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?,
        ),
    };

    let bookings: Arc<dyn BookingRepository> = match &config.database {
        Some(database) => {
            let db = DbClient::new(&database.url)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgBookingRepository::new(db))
        }
        None => Arc::new(InMemoryBookingRepository::new()),
    };

    let locks = Arc::new(LockManager::with_system_clock(
        seats,
        config.business_rules.hold_policy(),
    ));

    let app_state = AppState::new(
        locks,
        bookings,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    )?;

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
