//! Vision assessment endpoints.
//!
//! - assessing a component from photos (usage-tracked, cached, retried)
//! - parsing raw model text without a model call
//! - normalizing an already structured record
//! - cross-photo consistency validation
//! - usage counters

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::analysis::consistency::validate;
use crate::analysis::{parse_with_fallbacks, validate_and_normalize_structure};
use crate::api::{DataResponse, NoContent};
use crate::app::AppState;
use crate::domain::ai::{AssessRequest, NormalizeRequest, ParseRequest};
use crate::domain::consistency::ConsistencyRequest;
use crate::error::{ApiError, ApiResult};
use crate::middleware::request_id::request_id;

/// Assess one component from its photos.
///
/// POST /ai/assess
pub async fn assess_component(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssessRequest>,
) -> ApiResult<impl IntoResponse> {
    tracing::debug!(
        request_id = request_id(&headers),
        component = %req.component_name,
        "Assessment requested"
    );
    let response = state.assessments.assess_component(&req).await?;
    Ok(Json(DataResponse::new(response)))
}

/// Run the parser cascade over text the caller already has.
///
/// POST /ai/parse
pub async fn parse_response(Json(req): Json<ParseRequest>) -> ApiResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(parse_with_fallbacks(&req.raw_text))))
}

/// POST /ai/normalize
pub async fn normalize_record(Json(req): Json<NormalizeRequest>) -> ApiResult<impl IntoResponse> {
    let record = validate_and_normalize_structure(&req.candidate)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(DataResponse::new(record)))
}

/// Check that several assessments of one subject agree.
///
/// POST /ai/validate-consistency
pub async fn validate_consistency(
    Json(req): Json<ConsistencyRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.assessments.is_empty() {
        return Err(ApiError::BadRequest(
            "assessments must not be empty".to_string(),
        ));
    }
    Ok(Json(DataResponse::new(validate(
        &req.assessments,
        &req.metadata,
    ))))
}

/// GET /ai/usage
pub async fn get_usage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(DataResponse::new(state.assessments.usage().snapshot(Utc::now())))
}

/// POST /ai/usage/reset
pub async fn reset_usage(State(state): State<Arc<AppState>>) -> NoContent {
    state.assessments.usage().reset();
    NoContent
}
