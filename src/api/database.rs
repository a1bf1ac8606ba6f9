//! DELETE /database

use axum::{
    Json,
    extract::{Query, State as AxumState},
};
use serde::Deserialize;

use crate::SharedState;
use crate::auth::RequireBearer;
use crate::error::ApiError;
use crate::maintenance::{WipeReport, parse_table_selector};

#[derive(Debug, Default, Deserialize)]
pub struct WipeQuery {
    /// Comma separated table names; absent means the whole allow-list
    pub tables: Option<String>,
}

pub async fn wipe_database(
    _auth: RequireBearer,
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<WipeQuery>,
) -> Result<Json<WipeReport>, ApiError> {
    let requested = params.tables.as_deref().map(parse_table_selector);
    let tables = state.maintenance.select(requested.as_deref())?;
    let report = state.maintenance.wipe(&tables).await?;
    Ok(Json(report))
}
