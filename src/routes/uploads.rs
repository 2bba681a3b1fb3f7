//! Inspection image upload endpoints.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{DataResponse, NoContent};
use crate::app::AppState;
use crate::domain::uploads::UploadDestination;
use crate::error::{ApiError, ApiResult};
use crate::middleware::request_id::request_id;
use crate::services::BatchOptions;

/// Largest chunk a caller may ask for.
const MAX_CONCURRENT_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImagesRequest {
    pub images: Vec<String>,
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub component_name: Option<String>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageRequest {
    pub image: String,
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub component_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteImageRequest {
    pub path: String,
}

fn options(req: &UploadImagesRequest) -> ApiResult<BatchOptions<'static>> {
    if req.images.is_empty() {
        return Err(ApiError::BadRequest("images must not be empty".to_string()));
    }
    Ok(BatchOptions {
        max_concurrent: req.max_concurrent.map(|n| n.clamp(1, MAX_CONCURRENT_LIMIT)),
        ..Default::default()
    })
}

/// Upload a batch of room images.
///
/// POST /reports/:report_id/rooms/:room_id/images
pub async fn upload_images(
    Path((report_id, room_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadImagesRequest>,
) -> ApiResult<impl IntoResponse> {
    let options = options(&req)?;
    tracing::info!(
        request_id = request_id(&headers),
        report_id = %report_id,
        room_id = %room_id,
        images = req.images.len(),
        "Batch upload requested"
    );

    let destination = UploadDestination {
        report_id,
        room_id,
        property_name: req.property_name,
        room_name: req.room_name,
        component_name: req.component_name,
    };
    let result = state
        .uploads
        .upload_multiple_images(req.images, &destination, options)
        .await;

    Ok(Json(DataResponse::new(result)))
}

/// Same as [`upload_images`] but returns the flat legacy list.
///
/// POST /reports/:report_id/rooms/:room_id/images/legacy
pub async fn upload_images_legacy(
    Path((report_id, room_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadImagesRequest>,
) -> ApiResult<impl IntoResponse> {
    let options = options(&req)?;
    let urls = state
        .uploads
        .upload_multiple_report_images(
            req.images,
            &report_id,
            &room_id,
            req.property_name,
            req.room_name,
            req.component_name,
            options,
        )
        .await;

    Ok(Json(DataResponse::new(urls)))
}

/// Upload a single image with the full storage retry budget.
///
/// POST /reports/:report_id/rooms/:room_id/image
pub async fn upload_image(
    Path((report_id, room_id)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadImageRequest>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(
        request_id = request_id(&headers),
        report_id = %report_id,
        room_id = %room_id,
        "Single image upload requested"
    );

    let destination = UploadDestination {
        report_id,
        room_id,
        property_name: req.property_name,
        room_name: req.room_name,
        component_name: req.component_name,
    };
    let url = state.uploads.upload_image(&req.image, &destination).await?;

    Ok(Json(DataResponse::new(UploadImageResponse { url })))
}

/// Delete a stored image by object path or public URL.
///
/// DELETE /images
pub async fn delete_image(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteImageRequest>,
) -> ApiResult<NoContent> {
    tracing::info!(request_id = request_id(&headers), path = %req.path, "Image delete requested");
    state.uploads.delete_image(&req.path).await?;
    Ok(NoContent)
}
