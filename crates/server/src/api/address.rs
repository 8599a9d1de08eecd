//! Address parsing endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use geoloop_core::GeoError;
use geoloop_tool_runtime::{QueryContext, ToolCallRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::ApiError;
use crate::state::AppState;

const MAX_ADDRESS_CHARS: usize = 500;
const MAX_SYSTEM_PROMPT_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct AddressQuery {
    pub address: String,
    #[serde(default)]
    pub context: Option<QueryContext>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AddressQuery {
    /// Trimmed copy, or the reason the request is unacceptable.
    fn validated(mut self) -> Result<Self, GeoError> {
        self.address = self.address.trim().to_string();
        let len = self.address.chars().count();
        if len == 0 {
            return Err(GeoError::Validation("address must not be empty".into()));
        }
        if len > MAX_ADDRESS_CHARS {
            return Err(GeoError::Validation(format!(
                "address must be at most {} characters",
                MAX_ADDRESS_CHARS
            )));
        }
        if let Some(prompt) = &self.system_prompt {
            if prompt.chars().count() > MAX_SYSTEM_PROMPT_CHARS {
                return Err(GeoError::Validation(format!(
                    "system_prompt must be at most {} characters",
                    MAX_SYSTEM_PROMPT_CHARS
                )));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub success: bool,
    pub request_id: String,
    pub response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub error: Option<String>,
    pub iterations: usize,
    pub timestamp: DateTime<Utc>,
    pub processing_time: f64,
}

pub async fn parse_address(
    State(state): State<Arc<AppState>>,
    Json(query): Json<AddressQuery>,
) -> Result<Json<AddressResponse>, ApiError> {
    let fallback_id = Uuid::new_v4().to_string();
    let query = query
        .validated()
        .map_err(|e| ApiError::from(e).with_request_id(&fallback_id))?;
    let started = Instant::now();
    info!(address = %query.address, "Address parse request");

    let result = state
        .session
        .process_query_with_timeout(
            &query.address,
            query.context.as_ref(),
            query.system_prompt.as_deref(),
        )
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&fallback_id))?;

    Ok(Json(AddressResponse {
        success: result.success,
        request_id: result.request_id.unwrap_or(fallback_id),
        response: result.final_answer,
        tool_calls: result.tool_calls,
        error: result.error,
        iterations: result.iterations,
        timestamp: Utc::now(),
        processing_time: started.elapsed().as_secs_f64(),
    }))
}

#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub success: bool,
    pub response: String,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub total: usize,
    pub results: Vec<BatchItemResult>,
    pub success_count: usize,
    pub error_count: usize,
}

/// Runs the queries one after another; a failing item does not fail the batch.
pub async fn batch_parse(
    State(state): State<Arc<AppState>>,
    Json(queries): Json<Vec<AddressQuery>>,
) -> Result<Json<BatchResponse>, ApiError> {
    let batch_id = Uuid::new_v4().to_string();
    if queries.len() > state.max_batch {
        return Err(ApiError::from(GeoError::Validation(format!(
            "a batch may contain at most {} addresses",
            state.max_batch
        )))
        .with_request_id(&batch_id));
    }
    info!(batch_id = %batch_id, count = queries.len(), "Batch parse request");

    let mut results = Vec::with_capacity(queries.len());
    for (index, query) in queries.into_iter().enumerate() {
        let outcome = match query.validated() {
            Ok(q) => {
                state
                    .session
                    .process_query_with_timeout(
                        &q.address,
                        q.context.as_ref(),
                        q.system_prompt.as_deref(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        results.push(match outcome {
            Ok(result) => BatchItemResult {
                index,
                success: result.success,
                response: result.final_answer,
                error: result.error,
            },
            Err(e) => {
                warn!(batch_id = %batch_id, index, error = %e, "Batch item failed");
                BatchItemResult {
                    index,
                    success: false,
                    response: String::new(),
                    error: Some(e.to_string()),
                }
            }
        });
    }

    let success_count = results.iter().filter(|r| r.success).count();
    Ok(Json(BatchResponse {
        batch_id,
        total: results.len(),
        error_count: results.len() - success_count,
        success_count,
        results,
    }))
}
