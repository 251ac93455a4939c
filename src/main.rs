use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lifeos_onboarding::config::ServerConfig;
use lifeos_onboarding::llm::{LlmBackend, LlmConfig, create_provider};
use lifeos_onboarding::onboarding::{
    CompletionInvoker, OnboardingManager, OnboardingRouteState, SystemGenerator,
    onboarding_routes,
};
use lifeos_onboarding::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env().context("Failed to read configuration")?;

    eprintln!("LifeOS onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Chat API: http://0.0.0.0:{}/api/onboarding/chat", config.port);
    eprintln!("   Generate API: http://0.0.0.0:{}/api/onboarding/generate", config.port);

    // Create LLM provider
    let llm_config = LlmConfig {
        backend: LlmBackend::Anthropic,
        api_key: config.api_key.clone(),
        model: config.model.clone(),
        timeout: config.onboarding.llm_timeout,
    };
    let llm = create_provider(&llm_config)?;
    let invoker = Arc::new(CompletionInvoker::new(llm, config.onboarding.llm_timeout));

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );

    // ── Onboarding ───────────────────────────────────────────────────────
    let manager = Arc::new(OnboardingManager::new(
        Arc::clone(&db),
        Arc::clone(&invoker),
        config.onboarding.clone(),
    ));
    let generator = Arc::new(SystemGenerator::new(
        Arc::clone(&db),
        invoker,
        config.onboarding.batch_max_tokens,
    ));

    let app = onboarding_routes(OnboardingRouteState { manager, generator })
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Onboarding server started");
    axum::serve(listener, app).await?;

    Ok(())
}
