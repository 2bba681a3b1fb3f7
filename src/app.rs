use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Settings;
use crate::middleware::request_id_layer;
use crate::routes;
use crate::services::{
    AssessmentService, BatchUploadManager, GeminiClient, RedisCache, RetryPolicy,
    SupabaseStorage, TracingNotifier, UsageLimits, UsageTracker,
};

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub storage: Arc<SupabaseStorage>,
    pub uploads: BatchUploadManager<SupabaseStorage>,
    pub assessments: AssessmentService,
}

impl AppState {
    /// Build clients from settings. Nothing here touches the network.
    pub fn new(settings: Settings, cache: Option<RedisCache>) -> anyhow::Result<Arc<Self>> {
        let storage = Arc::new(SupabaseStorage::new(
            &settings.supabase_url,
            &settings.supabase_service_role_key,
            &settings.storage_bucket,
        )?);

        let uploads = BatchUploadManager::new(
            storage.clone(),
            Arc::new(TracingNotifier),
            settings.batch_max_concurrent,
            Duration::from_millis(settings.batch_chunk_delay_ms),
        )
        .with_policies(
            tuned(RetryPolicy::batch(), &settings),
            tuned(RetryPolicy::storage(), &settings),
        );

        let client = Arc::new(GeminiClient::new(
            &settings.gemini_api_url,
            &settings.gemini_api_key,
            &settings.gemini_model,
            settings.gemini_timeout_seconds,
        )?);
        let usage = Arc::new(UsageTracker::new(UsageLimits {
            daily_requests: settings.ai_daily_request_limit,
            monthly_cost_usd: settings.ai_monthly_cost_limit_usd,
            requests_per_minute: settings.ai_requests_per_minute,
        }));

        Ok(Arc::new(Self {
            assessments: AssessmentService::new(client, usage, cache)
                .with_policy(tuned(RetryPolicy::ai(), &settings)),
            storage,
            uploads,
            settings,
        }))
    }
}

/// Apply the deployment-wide retry knobs to a named profile.
fn tuned(policy: RetryPolicy, settings: &Settings) -> RetryPolicy {
    policy
        .with_backoff_factor(settings.retry_backoff_factor)
        .with_extra_patterns(settings.retry_extra_patterns.iter().cloned())
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // Build trace layer (use DEBUG for spans to reduce overhead at INFO level)
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let (set_request_id, propagate_request_id) = request_id_layer();

    // Images arrive inline, so axum's 2 MB extractor default is replaced
    let body_limit = state.settings.max_request_body_bytes;

    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        Duration::from_secs(86400)
    } else {
        Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}
