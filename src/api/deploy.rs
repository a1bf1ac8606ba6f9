//! POST /deploy

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State as AxumState},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::SharedState;
use crate::auth::RequireBearer;
use crate::deploy::{BranchName, DeployRequest, DeployResult};
use crate::error::ApiError;

/// `?branch=` form used by older callers
#[derive(Debug, Default, Deserialize)]
pub struct DeployQuery {
    pub branch: Option<String>,
}

/// Redeploy the working copy to the requested branch and wait for the outcome.
///
/// Stage failures are answered with 200 and `success: false`; only an
/// overlapping deploy (409) or a bad request (400) is an HTTP error.
pub async fn deploy(
    _auth: RequireBearer,
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<DeployQuery>,
    body: Bytes,
) -> Result<Json<DeployResult>, ApiError> {
    let branch = requested_branch(&params, &body)?;

    let Some(permit) = state.orchestrator.try_acquire() else {
        warn!("Deploy of '{}' rejected, another deploy is in flight", branch);
        return Err(ApiError::conflict("a deploy is already in progress"));
    };
    info!("Deploy of branch '{}' accepted", branch);

    // Detached so a disconnecting caller cannot abort the sequence midway
    let shared_state = state.clone();
    let task_branch = branch.clone();
    let handle =
        tokio::spawn(async move { shared_state.orchestrator.run(permit, &task_branch).await });

    match handle.await {
        Ok(result) => Ok(Json(result)),
        Err(e) => Err(ApiError::internal(format!(
            "deploy task for branch '{}' did not complete: {}",
            branch, e
        ))),
    }
}

/// The JSON body wins over the query parameter. No default branch.
pub fn requested_branch(params: &DeployQuery, body: &[u8]) -> Result<BranchName, ApiError> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: DeployRequest = serde_json::from_slice(body)
            .map_err(|e| ApiError::validation(format!("invalid JSON body: {}", e)))?;
        request.branch
    };

    let raw = from_body
        .or_else(|| params.branch.clone())
        .ok_or_else(|| ApiError::validation("branch is required"))?;
    BranchName::parse(&raw)
}
