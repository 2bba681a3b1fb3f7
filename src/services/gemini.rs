//! Vision model client and the component assessment flow built on it.
//!
//! Provides:
//! - `GeminiClient::generate_text`: one multimodal generation call, raced against a
//!   timeout, with every failure classified into an [`ErrorKind`]
//! - `AssessmentService::assess_component`: usage budget, result cache, retries and
//!   the parser cascade around that call

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::analysis::{parse_with_fallbacks, ParseMethod, ParseResult};
use crate::domain::ai::{AssessRequest, AssessResponse};
use crate::domain::uploads::DataUri;
use crate::error::{ErrorKind, ServiceError};
use crate::services::cache::{keys, RedisCache};
use crate::services::prompts::assessment_prompt;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::usage::{estimate_cost, UsageTracker};

/// More images than this in one call degrades answers and cost.
pub const MAX_IMAGES_PER_REQUEST: usize = 10;

/// Finish reasons that mean the model refused to answer.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Text and token usage of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_seconds: u64) -> anyhow::Result<Self> {
        // The per-attempt deadline is enforced by `generate_text`; this only bounds
        // connections that hang without ever producing a response.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(model = model, "Vision model client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_seconds.max(1)),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One generation call, abandoned after the configured timeout.
    #[instrument(skip(self, prompt, images), fields(model = %self.model, images = images.len()))]
    pub async fn generate_text(
        &self,
        prompt: &str,
        images: &[DataUri],
    ) -> Result<Generation, ServiceError> {
        match tokio::time::timeout(self.timeout, self.generate_once(prompt, images)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Vision model request timed out");
                Err(ServiceError::new(
                    ErrorKind::Timeout,
                    format!(
                        "Vision model request timed out after {}s",
                        self.timeout.as_secs()
                    ),
                ))
            }
        }
    }

    async fn generate_once(
        &self,
        prompt: &str,
        images: &[DataUri],
    ) -> Result<Generation, ServiceError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(url = %url, "Vision model request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(prompt, images))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Vision model request failed");
                ServiceError::from_reqwest("Vision model request failed", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.json::<ApiErrorBody>().await.ok().map(|b| b.error);
            return Err(status_error(status, detail));
        }

        let body: Value = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to read vision model response");
            ServiceError::new(
                ErrorKind::MalformedResponse,
                format!("Invalid vision model response: {}", e),
            )
        })?;

        extract_generation(&body)
    }

    /// Check the model is reachable with our key.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = format!("{}/models/{}", self.base_url, self.model);

        self.client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Vision model health check failed")?
            .error_for_status()
            .context("Vision model unhealthy")?;

        Ok(())
    }
}

fn request_body(prompt: &str, images: &[DataUri]) -> Value {
    let mut parts = vec![json!({ "text": prompt })];
    parts.extend(images.iter().map(|image| {
        json!({
            "inline_data": {
                "mime_type": image.mime_type,
                "data": image.to_base64(),
            }
        })
    }));

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": 0.2,
            "maxOutputTokens": 4096,
        }
    })
}

/// Error for a non-2xx response. The message keeps the status code so that pattern
/// based classification still recognizes it.
fn status_error(status: StatusCode, detail: Option<ApiErrorDetail>) -> ServiceError {
    let kind = match status {
        // 500 from this API is transient
        StatusCode::INTERNAL_SERVER_ERROR => ErrorKind::ServerUnavailable,
        _ => ErrorKind::from_status(status),
    };
    let message = match detail {
        Some(d) => match d.status {
            Some(code) => format!("Vision model error {} ({}): {}", status.as_u16(), code, d.message),
            None => format!("Vision model error {}: {}", status.as_u16(), d.message),
        },
        None => format!("Vision model error {}", status),
    };

    error!(status = %status, kind = ?kind, message = %message, "Vision model error");
    ServiceError::new(kind, message)
}

/// Pull the generated text out of a `generateContent` response.
fn extract_generation(body: &Value) -> Result<Generation, ServiceError> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(ServiceError::new(
            ErrorKind::ContentBlocked,
            format!("Request blocked by content filter: {}", reason),
        ));
    }

    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| {
            ServiceError::new(
                ErrorKind::MalformedResponse,
                "Vision model response has no candidates",
            )
        })?;

    let finish_reason = candidate.get("finishReason").and_then(Value::as_str);
    if let Some(reason) = finish_reason.filter(|r| BLOCKED_FINISH_REASONS.contains(r)) {
        return Err(ServiceError::new(
            ErrorKind::ContentBlocked,
            format!("Response blocked by content filter: {}", reason),
        ));
    }

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ServiceError::new(
            ErrorKind::MalformedResponse,
            format!(
                "Vision model returned no text (finish reason: {})",
                finish_reason.unwrap_or("unknown")
            ),
        ));
    }
    if finish_reason == Some("MAX_TOKENS") {
        // The cascade copes with truncated output, so keep it
        warn!(len = text.len(), "Vision model output truncated at token limit");
    }

    let tokens = |key: &str| {
        body.pointer(&format!("/usageMetadata/{}", key))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    };

    Ok(Generation {
        text,
        prompt_tokens: tokens("promptTokenCount"),
        output_tokens: tokens("candidatesTokenCount"),
    })
}

/// Component assessment: budget check, cache, retried model call, parser cascade.
#[derive(Clone)]
pub struct AssessmentService {
    client: Arc<GeminiClient>,
    usage: Arc<UsageTracker>,
    cache: Option<RedisCache>,
    policy: RetryPolicy,
}

impl AssessmentService {
    pub fn new(client: Arc<GeminiClient>, usage: Arc<UsageTracker>, cache: Option<RedisCache>) -> Self {
        Self {
            client,
            usage,
            cache,
            policy: RetryPolicy::ai(),
        }
    }

    /// Replace the retry policy used around each model call.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn client(&self) -> &GeminiClient {
        &self.client
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn cache(&self) -> Option<&RedisCache> {
        self.cache.as_ref()
    }

    #[instrument(skip(self, request), fields(component = %request.component_name, images = request.images.len()))]
    pub async fn assess_component(&self, request: &AssessRequest) -> Result<AssessResponse, ServiceError> {
        let images = validate_request(request)?;
        let prompt = assessment_prompt(
            &request.component_name,
            request.room_type.as_deref(),
            request.inspection_mode,
            request.check_in_assessment.as_ref(),
        );
        let model = self.client.model();
        let cache_key = keys::assessment(model, &prompt, &request.images);

        if let Some(cache) = &self.cache {
            if let Some(result) = cache.get::<ParseResult>(&cache_key).await {
                return Ok(AssessResponse {
                    component_name: request.component_name.clone(),
                    needs_review: result.needs_review(),
                    result,
                    cached: true,
                });
            }
        }

        let (client, usage, prompt, images) = (&*self.client, &*self.usage, prompt.as_str(), images.as_slice());
        let generation = with_retry(
            || async move {
                usage.check_and_reserve(model, Utc::now())?;
                let generation = client.generate_text(prompt, images).await?;
                usage.record(
                    model,
                    estimate_cost(model, generation.prompt_tokens, generation.output_tokens),
                    Utc::now(),
                );
                Ok::<_, ServiceError>(generation)
            },
            &self.policy,
            None,
        )
        .await?;

        let result = parse_with_fallbacks(&generation.text);
        info!(
            method = ?result.method(),
            confidence = result.confidence(),
            prompt_tokens = generation.prompt_tokens,
            output_tokens = generation.output_tokens,
            "Component assessed"
        );

        // A placeholder is not worth serving again
        if result.method() != ParseMethod::Fallback {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.set(&cache_key, &result).await {
                    warn!(error = %e, "Failed to cache assessment");
                }
            }
        }

        Ok(AssessResponse {
            component_name: request.component_name.clone(),
            needs_review: result.needs_review(),
            result,
            cached: false,
        })
    }
}

fn validate_request(request: &AssessRequest) -> Result<Vec<DataUri>, ServiceError> {
    if request.component_name.trim().is_empty() {
        return Err(ServiceError::validation("componentName is required"));
    }
    if request.images.is_empty() {
        return Err(ServiceError::validation("At least one image is required"));
    }
    if request.images.len() > MAX_IMAGES_PER_REQUEST {
        return Err(ServiceError::validation(format!(
            "At most {} images can be assessed at once",
            MAX_IMAGES_PER_REQUEST
        )));
    }
    request
        .images
        .iter()
        .enumerate()
        .map(|(i, uri)| {
            DataUri::parse(uri)
                .map_err(|e| ServiceError::validation(format!("Image {}: {}", i + 1, e)))
        })
        .collect()
}
