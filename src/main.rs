use std::sync::Arc;

use redis::Client as RedisClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidtube_api::{
    app,
    config::Config,
    db::{self, users::PgUserStore},
    services::storage::create_storage,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidtube_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis = match config.redis_url.as_deref() {
        Some(url) => {
            let conn = RedisClient::open(url)?
                .get_multiplexed_async_connection()
                .await?;
            info!("Redis connected");
            Some(conn)
        }
        None => {
            info!("REDIS_URL not set, login rate limiting disabled");
            None
        }
    };

    let storage = create_storage(&config).await?;
    info!(backend = storage.backend_name(), "Object storage ready");

    let users = Arc::new(PgUserStore::new(pool.clone()));
    let state = AppState::new(pool, users, storage, redis, config.clone());

    let addr = format!("{}:{}", config.host, config.port);
    info!("vidtube API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
