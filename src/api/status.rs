//! Liveness and status endpoints

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;
use crate::auth::RequireBearer;
use crate::deploy::{DEFAULT_MAX_HISTORY, DeployResult, InFlightDeploy};

const SERVICE_NAME: &str = "e2e_control";

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub started_at: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct DeployStatus {
    pub current: Option<InFlightDeploy>,
    pub recent: Vec<DeployResult>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server: ServerInfo,
    pub deploys: DeployStatus,
    pub wipeable_tables: Vec<String>,
}

/// Root liveness probe, no authentication.
/// Supports ?format=json for a small JSON body
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(String::as_str) == Some("json") {
        Json(json!({
            "name": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "status": "healthy"
        }))
        .into_response()
    } else {
        format!("{} - healthy", SERVICE_NAME).into_response()
    }
}

/// GET /status - in-flight deploy and most recent results
pub async fn status(
    _auth: RequireBearer,
    AxumState(state): AxumState<SharedState>,
) -> Json<StatusResponse> {
    let (current, recent) = state.orchestrator.snapshot(DEFAULT_MAX_HISTORY);

    Json(StatusResponse {
        server: ServerInfo {
            name: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            started_at: state.started_at.to_rfc3339(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        },
        deploys: DeployStatus { current, recent },
        wipeable_tables: state.maintenance.allow_list().to_vec(),
    })
}
