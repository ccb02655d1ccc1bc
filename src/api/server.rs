use super::auth::{AuthSettings, auth_middleware};
use super::handlers;
use crate::session::SessionManager;
use crate::store::Backend;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use log::info;
use std::sync::Arc;

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<SessionManager>,
    pub backend: Arc<dyn Backend>,
    pub auth: AuthSettings,
}

/// Builds the full router: authenticated session routes under `/api` plus an
/// open `/health` probe.
pub fn build_router(state: ApiState) -> Router {
    let session_routes = Router::new()
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{staff_id}/status", get(handlers::get_status))
        .route("/sessions/{staff_id}/qr", get(handlers::get_qr))
        .route(
            "/sessions/{staff_id}/pair",
            post(handlers::request_pairing_code),
        )
        .route("/sessions/{staff_id}/connect", post(handlers::connect))
        .route("/sessions/{staff_id}/disconnect", post(handlers::disconnect))
        .route("/sessions/{staff_id}/send", post(handlers::send_message))
        .route("/sessions/{staff_id}/sync", post(handlers::trigger_sync))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    Router::new()
        .nest("/api", session_routes)
        .route("/health", get(handlers::health))
}

/// Binds and serves until the process is shut down.
pub async fn serve(bind: &str, state: ApiState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(target: "Api", "Listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
