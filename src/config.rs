use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,
    pub max_request_body_bytes: usize,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Vision model
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_api_url: String,
    pub gemini_timeout_seconds: u64,

    // Object store
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    pub storage_bucket: String,

    // Redis (optional assessment cache)
    pub redis_url: Option<String>,
    pub redis_cache_ttl_seconds: u64,

    // Batch uploads
    pub batch_max_concurrent: usize,
    pub batch_chunk_delay_ms: u64,

    // Retries (applies to every retry profile)
    pub retry_backoff_factor: f64,
    pub retry_extra_patterns: Vec<String>,

    // Usage budget
    pub ai_daily_request_limit: u32,
    pub ai_monthly_cost_limit_usd: f64,
    pub ai_requests_per_minute: u32,
}

/// Parse an optional numeric env var, falling back to `default` when unset or invalid.
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        // Images arrive inline as data URIs, so the default is generous
        let max_request_body_bytes = parse_or("MAX_REQUEST_BODY_BYTES", 25 * 1024 * 1024);

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Vision model
        let gemini_api_key = env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());
        let gemini_api_url = env::var("GEMINI_API_URL").unwrap_or_else(|_| {
            "https://generativelanguage.googleapis.com/v1beta".to_string()
        });
        let gemini_timeout_seconds = parse_or("GEMINI_TIMEOUT_SECONDS", 60);

        // Object store
        let supabase_url = env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .context("SUPABASE_SERVICE_ROLE_KEY must be set")?;
        let storage_bucket =
            env::var("STORAGE_BUCKET").unwrap_or_else(|_| "inspection-images".to_string());

        // Redis
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty());
        let redis_cache_ttl_seconds = parse_or("REDIS_CACHE_TTL_SECONDS", 86400); // 24 hours

        // Batch uploads
        let batch_max_concurrent = parse_or("BATCH_MAX_CONCURRENT", 3usize).max(1);
        let batch_chunk_delay_ms = parse_or("BATCH_CHUNK_DELAY_MS", 500);

        // Retries
        let retry_backoff_factor = parse_or("RETRY_BACKOFF_FACTOR", 2.0f64).max(1.0);
        let retry_extra_patterns = env::var("RETRY_EXTRA_PATTERNS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Usage budget
        let ai_daily_request_limit = parse_or("AI_DAILY_REQUEST_LIMIT", 500);
        let ai_monthly_cost_limit_usd = parse_or("AI_MONTHLY_COST_LIMIT_USD", 50.0);
        let ai_requests_per_minute = parse_or("AI_REQUESTS_PER_MINUTE", 15);

        Ok(Settings {
            env,
            server_addr,
            max_request_body_bytes,
            cors_allow_origins,
            gemini_api_key,
            gemini_model,
            gemini_api_url,
            gemini_timeout_seconds,
            supabase_url,
            supabase_service_role_key,
            storage_bucket,
            redis_url,
            redis_cache_ttl_seconds,
            batch_max_concurrent,
            batch_chunk_delay_ms,
            retry_backoff_factor,
            retry_extra_patterns,
            ai_daily_request_limit,
            ai_monthly_cost_limit_usd,
            ai_requests_per_minute,
        })
    }
}

#[cfg(test)]
impl Settings {
    /// Settings pointing at unreachable local endpoints, for handler tests.
    pub fn for_tests() -> Self {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".to_string(),
            max_request_body_bytes: 1024 * 1024,
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            gemini_api_key: "test-key".to_string(),
            gemini_model: "gemini-test".to_string(),
            gemini_api_url: "http://127.0.0.1:9/v1beta".to_string(),
            gemini_timeout_seconds: 1,
            supabase_url: "http://127.0.0.1:9".to_string(),
            supabase_service_role_key: "test-role-key".to_string(),
            storage_bucket: "test-bucket".to_string(),
            redis_url: None,
            redis_cache_ttl_seconds: 60,
            batch_max_concurrent: 2,
            batch_chunk_delay_ms: 0,
            retry_backoff_factor: 2.0,
            retry_extra_patterns: Vec::new(),
            ai_daily_request_limit: 10,
            ai_monthly_cost_limit_usd: 1.0,
            ai_requests_per_minute: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_defaults_to_dev() {
        assert_eq!(Environment::from_str("production"), Environment::Prod);
        assert_eq!(Environment::from_str("PROD"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything"), Environment::Dev);
        assert!(Environment::Dev.is_dev());
        assert!(Environment::Prod.is_prod());
    }
}
