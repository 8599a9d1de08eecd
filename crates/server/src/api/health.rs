//! Health and tool catalog endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use geoloop_agent::HealthReport;
use geoloop_tool_runtime::ToolSpec;
use serde::Serialize;

use super::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub report: HealthReport,
}

/// Always 200; problems are reported in the body.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let report = state.session.health().await;
    Json(HealthResponse {
        status: report.status(),
        version: env!("CARGO_PKG_VERSION"),
        report,
    })
}

#[derive(Serialize)]
pub struct ToolsResponse {
    pub success: bool,
    pub count: usize,
    pub tools: Vec<ToolSpec>,
}

pub async fn tools(State(state): State<Arc<AppState>>) -> Result<Json<ToolsResponse>, ApiError> {
    let tools = state.session.get_available_tools().await?;
    Ok(Json(ToolsResponse {
        success: true,
        count: tools.len(),
        tools,
    }))
}
