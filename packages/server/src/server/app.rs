//! Application setup and server configuration.

use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::{get, patch, post};
use axum::{Extension, Router};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::server::routes::{health, schedules};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
}

/// Build the Axum application router.
pub fn build_app(pool: PgPool) -> Router {
    let state = AppState { pool };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/schedules/daily", post(schedules::create_daily_handler))
        .route(
            "/schedules/interval",
            post(schedules::create_interval_handler),
        )
        .route("/schedules/once", post(schedules::create_once_handler))
        .route("/schedules", get(schedules::list_handler))
        .route("/schedules/by_key", patch(schedules::update_by_key_handler))
        .route(
            "/schedules/by_key/delete",
            post(schedules::delete_by_key_handler),
        )
        .route(
            "/schedules/by_key/delete_all",
            post(schedules::delete_all_for_key_handler),
        )
        .route(
            "/schedules/:id",
            patch(schedules::update_handler).delete(schedules::delete_handler),
        )
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
