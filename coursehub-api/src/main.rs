use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursehub_api::{app, worker, AppState, AuthConfig};
use coursehub_core::{LogNotifier, Notifier};
use coursehub_lifecycle::Repositories;
use coursehub_store::app_config::Config;
use coursehub_store::{
    DbClient, EventProducer, KafkaNotifier, RedisClient, StoreBillRepository, StoreCourseRepository,
    StoreEnrollmentRepository, StoreRefundRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursehub_api=debug,coursehub_lifecycle=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting CourseHub API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // settings table wins over files
    let (refund_policy, reconciliation_policy) = db
        .fetch_policies(config.refunds.clone(), config.reconciliation.clone())
        .await
        .context("Failed to load system settings")?;
    tracing::info!(?refund_policy, ?reconciliation_policy, "Policies loaded");

    let refunds = Arc::new(StoreRefundRepository::new(db.pool.clone()));
    let repos = Repositories {
        courses: Arc::new(StoreCourseRepository::new(db.pool.clone())),
        enrollments: Arc::new(StoreEnrollmentRepository::new(db.pool.clone())),
        bills: Arc::new(StoreBillRepository::new(db.pool.clone())),
        refunds: refunds.clone(),
        cascade: Some(refunds),
    };

    let notifier: Arc<dyn Notifier> = if config.kafka.brokers.is_empty() {
        tracing::warn!("No Kafka brokers configured, lifecycle events go to the log only");
        Arc::new(LogNotifier)
    } else {
        let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
        Arc::new(KafkaNotifier::new(producer))
    };

    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let state = AppState::new(
        repos,
        notifier,
        refund_policy,
        reconciliation_policy,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    )?
    .with_redis(Arc::new(redis), config.server.rate_limit_per_minute);

    tokio::spawn(worker::start_reconciliation_worker(state.clone()));

    let app = app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
