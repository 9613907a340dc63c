pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, patch, post, put},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::users::UserStore;
use services::{credentials::CredentialService, storage::ObjectStorage, uploads::UploadOrchestrator};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub users: Arc<dyn UserStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub credentials: Arc<CredentialService>,
    pub uploads: Arc<UploadOrchestrator>,
    pub redis: Option<redis::aio::MultiplexedConnection>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the services from `config` around already-connected backends.
    pub fn new(
        db: PgPool,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn ObjectStorage>,
        redis: Option<redis::aio::MultiplexedConnection>,
        config: Arc<Config>,
    ) -> Self {
        let credentials = Arc::new(CredentialService::new(config.token_settings()));
        let uploads = Arc::new(UploadOrchestrator::new(
            Arc::clone(&storage),
            config.upload_settings(),
        ));
        Self {
            db,
            users,
            storage,
            credentials,
            uploads,
            redis,
            config,
        }
    }
}

/// Allow the configured frontend origin, and localhost for development.
fn cors_layer(config: &Config) -> CorsLayer {
    let allowed = config.cors_origin.clone();
    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let o = match origin.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        };
        if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
            return true;
        }
        allowed.as_deref().is_some_and(|a| a.trim_end_matches('/') == o)
    });

    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::RANGE,
        ]))
        .allow_credentials(true)
        .allow_origin(origin)
}

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(routes::health::health_check))
        // Users
        .route("/users/register", post(routes::users::register))
        .route("/users/login", post(routes::users::login))
        .route("/users/refresh", post(routes::users::refresh))
        .route("/users/logout", post(routes::users::logout))
        .route("/users/me", get(routes::users::me))
        // Channels
        .route("/channels/create", post(routes::channels::create_channel))
        .route("/channels/{name}", get(routes::channels::get_channel))
        .route("/channels/{name}/banner", put(routes::channels::update_banner))
        .route("/channels/{name}/name", put(routes::channels::rename_channel))
        .route("/channels/{name}/subscribe", post(routes::channels::subscribe))
        .route("/channels/{name}/unsubscribe", post(routes::channels::unsubscribe))
        .route("/channels/{name}/subscribers", get(routes::channels::list_subscribers))
        .route(
            "/channels/{name}/subscribers/count",
            get(routes::channels::subscriber_count),
        )
        // Videos
        .route(
            "/videos",
            get(routes::videos::list_videos).post(routes::videos::post_video),
        )
        .route(
            "/videos/channel/{channel_id}",
            get(routes::videos::list_channel_videos),
        )
        .route(
            "/videos/{id}",
            get(routes::videos::get_video).delete(routes::videos::delete_video),
        )
        .route("/videos/{id}/thumbnail", patch(routes::videos::update_thumbnail))
        .route("/videos/{id}/visibility", patch(routes::videos::set_visibility))
        .route("/videos/{id}/view", put(routes::videos::view_video))
        .route("/videos/{id}/like", post(routes::videos::like_video))
        .route("/videos/{id}/unlike", post(routes::videos::unlike_video))
        .route("/videos/{id}/likes/count", get(routes::videos::like_count))
        // Media
        .route("/media/files/{*path}", get(routes::media::serve_media))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
