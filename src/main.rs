mod access;
mod config;
mod db;
mod domain;
mod error;
mod middleware;
mod services;
mod state;
mod web;

use crate::config::{Config, StoreBackend};
use crate::db::{seed, MemoryStore, PgStore, SharedStore};
use crate::services::pending::IngestPipeline;
use crate::services::scoring::{self, OpenAiScorer, ScoringRunner};
use crate::state::SharedState;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCORING_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;
    tracing::info!("Starting with {:?}", config);

    let store = connect_store(&config).await?;
    seed::seed_all(store.as_ref(), &config).await?;

    let scoring_queue = match config.openai_api_key.clone() {
        Some(api_key) => {
            let scorer = OpenAiScorer::new(api_key, config.scoring_model.clone());
            let runner = ScoringRunner::new(store.clone(), Arc::new(scorer));
            let (queue, rx) = scoring::channel(runner.clone(), SCORING_QUEUE_CAPACITY);
            tokio::spawn(scoring::run_worker(runner, rx));
            Some(queue)
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, automatic scoring disabled");
            None
        }
    };

    let pipeline = IngestPipeline::new(store.clone(), scoring_queue, config.ingest_max_attempts);
    let shared: SharedState = Arc::new(state::AppState {
        store,
        config,
        pipeline,
    });

    let scheduler = JobScheduler::new().await?;

    // Pending ingest retry - every 15 seconds
    let shared_for_drain = shared.clone();
    scheduler
        .add(Job::new_async("*/15 * * * * *", move |_uuid, _l| {
            let state = shared_for_drain.clone();
            Box::pin(async move {
                if let Err(e) = state.pipeline.drain(chrono::Utc::now()).await {
                    tracing::error!("Pending ingest drain failed: {}", e);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started: pending ingest drain every 15s");

    let app = Router::new()
        .merge(web::routes(shared.clone()))
        .layer(TraceLayer::new_for_http());

    let addr = shared.config.bind_addr.clone();
    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn connect_store(config: &Config) -> anyhow::Result<SharedStore> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("STORE=memory: data lives only as long as this process");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL missing"))?;

            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to run database migrations: {}", e);
                    e
                })?;
            tracing::info!("Database migrations completed");

            Ok(Arc::new(PgStore::new(pool, config.storage_retry_attempts)))
        }
    }
}
