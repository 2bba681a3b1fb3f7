use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub storage: String,
    pub vision_model: String,
    pub cache: String,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let cache_check = async {
        match state.assessments.cache() {
            Some(cache) => Some(cache.health_check().await.is_ok()),
            None => None,
        }
    };

    // Check all services in parallel
    let (storage_result, vision_result, cache_ok) = tokio::join!(
        state.storage.health_check(),
        state.assessments.client().health_check(),
        cache_check,
    );

    let label = |ok: bool| if ok { "ok" } else { "error" };
    let storage_ok = storage_result.is_ok();
    let vision_ok = vision_result.is_ok();

    // The cache is optional; without storage and the model nothing works
    let status = if storage_ok && vision_ok && cache_ok != Some(false) {
        "healthy"
    } else if storage_ok || vision_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                storage: label(storage_ok).to_string(),
                vision_model: label(vision_ok).to_string(),
                cache: cache_ok.map(label).unwrap_or("disabled").to_string(),
            },
        }),
    )
}
