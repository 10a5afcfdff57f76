//! HTTP surface: REST snapshots and WebSocket subscriptions.

pub mod handlers;
pub mod state;
pub mod views;
pub mod ws;

pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // For our own health checks
        .route("/ping", get(handlers::ping))
        // Cached snapshots
        .route("/ns", get(handlers::list_namespaces))
        .route("/ns/{name}", get(handlers::get_namespace))
        .route("/ns/{name}/pods", get(handlers::namespace_pods))
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/{name}", get(handlers::get_node))
        .route("/pods", get(handlers::list_pods))
        // Health rollups
        .route("/health/namespaces", get(handlers::namespace_health))
        .route("/report", get(handlers::report))
        .route("/urls", get(handlers::url_results))
        // Backup extension
        .route("/velero/backups", get(handlers::list_backups))
        .route(
            "/velero/backups/{namespace}",
            get(handlers::list_backups_in_namespace),
        )
        .route("/velero/schedules", get(handlers::list_schedules))
        .route(
            "/velero/schedules/{namespace}",
            get(handlers::list_schedules_in_namespace),
        )
        // Subscriptions
        .route("/ws", get(ws::watch_all))
        .route("/ws/namespaces", get(ws::watch_namespaces))
        .route("/ws/nodes", get(ws::watch_nodes))
        .route("/ws/urls", get(ws::watch_urls))
        .route("/ws/ns/{name}", get(ws::watch_namespace))
        .route("/health/ws", get(ws::watch_all))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
