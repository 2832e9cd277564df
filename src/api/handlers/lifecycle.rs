//! Lifecycle Intake Handlers (internal)
//!
//! The milestone service drives state transitions; these endpoints are its
//! seam into the exchange. They sit under /internal and are expected to be
//! reachable only from the private network.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;
use crate::error::{ApiResponse, ServiceError};
use crate::models::{MilestoneStatus, Outcome};

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: MilestoneStatus,
    pub resolved_option: Option<Outcome>,
}

#[derive(Debug, Serialize)]
pub struct SetStatusResponse {
    pub milestone_id: i64,
    pub status: MilestoneStatus,
}

/// POST /internal/milestones/:id/status
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(milestone_id): Path<i64>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<ApiResponse<SetStatusResponse>>, ServiceError> {
    if req.status == MilestoneStatus::Resolved && req.resolved_option.is_none() {
        return Err(ServiceError::invalid(
            "resolved status requires resolved_option",
        ));
    }

    state
        .lifecycle
        .set_status(milestone_id, req.status, req.resolved_option)
        .await?;

    Ok(Json(ApiResponse::success(SetStatusResponse {
        milestone_id,
        status: req.status,
    })))
}
