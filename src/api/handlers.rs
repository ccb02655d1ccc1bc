use super::server::ApiState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Error payload; only coarse labels cross the boundary, never close codes
/// or retry counters.
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_gateway(e: impl std::fmt::Display) -> Self {
        Self(StatusCode::BAD_GATEWAY, e.to_string())
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub staff_id: String,
    pub status: String,
    pub phone_number: Option<String>,
}

pub async fn get_status(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
) -> Json<StatusResponse> {
    let status = state.manager.get_status(&staff_id).await;
    Json(StatusResponse {
        phone_number: state.manager.phone_number(&staff_id),
        staff_id,
        status: status.to_string(),
    })
}

pub async fn get_qr(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "qr": state.manager.get_qr(&staff_id) }))
}

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub phone_number: String,
}

pub async fn request_pairing_code(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
    Json(body): Json<PairRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let code = state
        .manager
        .request_pairing_code(&staff_id, &body.phone_number)
        .await
        .map_err(ApiError::bad_gateway)?;
    Ok(Json(serde_json::json!({ "pairing_code": code })))
}

pub async fn connect(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .manager
        .get_client(&staff_id)
        .await
        .map_err(ApiError::bad_gateway)?;
    let status = state.manager.get_status(&staff_id).await;
    Ok(Json(StatusResponse {
        phone_number: state.manager.phone_number(&staff_id),
        staff_id,
        status: status.to_string(),
    }))
}

pub async fn disconnect(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .manager
        .disconnect(&staff_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub text: String,
}

pub async fn send_message(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
    Json(body): Json<SendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .manager
        .send_message(&staff_id, &body.to, &body.text)
        .await
        .map_err(ApiError::bad_gateway)?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

pub async fn trigger_sync(
    State(state): State<ApiState>,
    Path(staff_id): Path<String>,
) -> Json<serde_json::Value> {
    let started = state.manager.trigger_sync(&staff_id);
    Json(serde_json::json!({ "started": started }))
}

/// Monitoring feed: every account currently known in memory.
pub async fn list_sessions(State(state): State<ApiState>) -> Json<Vec<StatusResponse>> {
    let mut rows: Vec<StatusResponse> = state
        .manager
        .session_snapshot()
        .into_iter()
        .map(|s| StatusResponse {
            staff_id: s.staff_id.clone(),
            status: s.state().to_string(),
            phone_number: s.phone_number(),
        })
        .collect();
    rows.sort_by(|a, b| a.staff_id.cmp(&b.staff_id));
    Json(rows)
}

/// Unauthenticated liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
