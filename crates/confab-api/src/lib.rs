pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    handlers::stream,
    middleware::logging,
    routes::{health, messages, threads, workspace},
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(health::health_check))
        // Workspace
        .route(
            "/workspace",
            get(workspace::get_workspace).put(workspace::update_workspace),
        )
        // Threads
        .route("/threads", get(threads::list_threads).post(threads::create_thread))
        .route("/threads/recent", get(threads::most_recent_thread))
        .route(
            "/threads/:thread_id",
            get(threads::get_thread)
                .patch(threads::update_thread)
                .delete(threads::delete_thread),
        )
        .route("/threads/:thread_id/clear", post(threads::clear_thread))
        // Messages
        .route(
            "/threads/:thread_id/messages",
            get(messages::list_messages).post(messages::add_message),
        )
        .route(
            "/threads/:thread_id/messages/:message_id",
            patch(messages::update_message).delete(messages::delete_message),
        )
        .route(
            "/threads/:thread_id/messages/:message_id/cancel",
            post(messages::cancel_message),
        )
        .route("/messages/:message_id", delete(messages::delete_message_everywhere))
        // Streaming
        .route("/threads/:thread_id/chat", post(stream::chat_stream));

    api_routes
        .layer(axum_middleware::from_fn(logging::log_request))
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(300)))
        .layer(build_cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if !config.cors.enabled {
        return CorsLayer::new();
    }

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([
            axum::http::HeaderName::from_static(stream::THREAD_ID_HEADER),
            axum::http::HeaderName::from_static(stream::REPLY_ID_HEADER),
            axum::http::HeaderName::from_static(stream::USER_MESSAGE_ID_HEADER),
        ]);

    if config.cors.origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let parsed_origins: Vec<axum::http::HeaderValue> = config
            .cors
            .origins
            .iter()
            .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
            .collect();

        cors.allow_origin(parsed_origins)
    }
}
