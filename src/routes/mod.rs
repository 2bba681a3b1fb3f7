pub mod ai;
pub mod health;
pub mod uploads;

use axum::{routing::delete, routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        // Image uploads
        .route(
            "/reports/:report_id/rooms/:room_id/images",
            post(uploads::upload_images),
        )
        .route(
            "/reports/:report_id/rooms/:room_id/image",
            post(uploads::upload_image),
        )
        .route(
            "/reports/:report_id/rooms/:room_id/images/legacy",
            post(uploads::upload_images_legacy),
        )
        .route("/images", delete(uploads::delete_image))
        // Vision assessments
        .route("/ai/assess", post(ai::assess_component))
        .route("/ai/parse", post(ai::parse_response))
        .route("/ai/normalize", post(ai::normalize_record))
        .route("/ai/validate-consistency", post(ai::validate_consistency))
        .route("/ai/usage", get(ai::get_usage))
        .route("/ai/usage/reset", post(ai::reset_usage))
}
