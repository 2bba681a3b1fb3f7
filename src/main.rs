mod analysis;
mod api;
mod app;
mod config;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::Result;

use services::RedisCache;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        model = %settings.gemini_model,
        "Starting inspection backend"
    );

    // The result cache is optional; run without it rather than refuse to start
    let cache = match &settings.redis_url {
        Some(url) => match RedisCache::new(url, settings.redis_cache_ttl_seconds).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable - assessment cache disabled");
                None
            }
        },
        None => {
            tracing::info!("REDIS_URL not set - assessment cache disabled");
            None
        }
    };

    let state = app::AppState::new(settings.clone(), cache)?;

    // Check the vision model in the background (non-blocking)
    tokio::spawn({
        let state = state.clone();
        async move {
            match state.assessments.client().health_check().await {
                Ok(()) => tracing::info!("Vision model is reachable"),
                Err(e) => tracing::warn!(error = %e, "Vision model health check failed - will retry on first request"),
            }
        }
    });

    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
