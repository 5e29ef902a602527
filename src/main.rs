use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aula_backend::api::router;
use aula_backend::config::AppConfig;
use aula_backend::services::{RateLimiter, Reconciler, RoomCache, run_sweeper};
use aula_backend::state::AppState;
use aula_backend::videochat::{VideochatConfig, VideochatHttpClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aula_backend=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::new_from_env()?);

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://aula.db".to_string());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let limiter = Arc::new(RateLimiter::new(config.min_request_interval));
    let cache = Arc::new(RoomCache::new(config.room_cache_ttl));
    tokio::spawn(run_sweeper(cache.clone()));

    let provider = Arc::new(VideochatHttpClient::new(
        VideochatConfig {
            base_url: config.videochat_url.clone(),
            jwt_secret: config.jwt_secret.clone(),
            timeout: config.provision_timeout,
            max_retries: config.max_retries,
        },
        limiter,
    )?);

    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        provider,
        cache,
        config.default_timezone,
    ));

    let state = AppState {
        db: pool,
        reconciler,
        config: config.clone(),
    };

    let app = router(state);

    info!("listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
