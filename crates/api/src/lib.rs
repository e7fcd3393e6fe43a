pub mod auth;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;

use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post, put},
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .settings
        .app
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Event ingestion (internal producers)
    let event_routes = Router::new().route("/", post(routes::events::trigger));

    // Notification feed (under workspace)
    let notification_routes = Router::new()
        .route("/", get(routes::notifications::list))
        .route("/unread-count", get(routes::notifications::unread_count))
        .route("/read-all", put(routes::notifications::mark_all_read))
        .route(
            "/{notification_id}/read",
            put(routes::notifications::mark_read),
        );

    // Preference routes (under workspace)
    let preference_routes = Router::new()
        .route("/", get(routes::preferences::get))
        .route("/", put(routes::preferences::update))
        .route(
            "/quiet-hours",
            get(routes::preferences::quiet_hours_status),
        );

    // Webhook integration routes (under workspace)
    let integration_routes = Router::new()
        .route("/", get(routes::integrations::list))
        .route("/{provider}", put(routes::integrations::connect))
        .route("/{provider}", delete(routes::integrations::disconnect));

    // Web push device registration
    let push_routes = Router::new()
        .route("/subscription", post(routes::push::subscribe))
        .route("/subscription", delete(routes::push::unsubscribe));

    // Inbound provider callbacks (signature auth, not JWT)
    let interaction_routes = Router::new().route("/slack", post(routes::interactions::slack));

    let api = Router::new()
        .nest("/event", event_routes)
        .nest("/push", push_routes)
        .nest("/interaction", interaction_routes)
        .nest(
            "/workspace/{workspace_id}/notification",
            notification_routes,
        )
        .nest("/workspace/{workspace_id}/preference", preference_routes)
        .nest("/workspace/{workspace_id}/integration", integration_routes);

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
