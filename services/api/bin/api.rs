//! Main Entrypoint for the DESC API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the phase prompts.
//! 3. Initializing shared services (the model client and the speech synthesizer).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use desc_api::{
    config::Config,
    router::create_router,
    state::{AppState, SessionRegistry},
};
use desc_core::{
    llm_client::{LLMClient, OpenAICompatibleClient},
    prompts::PhasePrompts,
    tts::ElevenLabsSynthesizer,
    voice::SpeechSynthesizer,
};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = std::fs::read_dir(prompts_path)
        .with_context(|| format!("Cannot read prompts directory {}", prompts_path.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Prompts ---
    let templates = load_prompts(&config.prompts_path)?;
    let prompts = PhasePrompts::from_templates(&templates)
        .context("Prompts directory must contain brief.md, roleplay.md and debrief.md")?;

    // --- 4. Initialize Shared Services ---
    let llm_client: Arc<dyn LLMClient> = Arc::new(
        OpenAICompatibleClient::new(
            &config.openai_api_key,
            &config.openai_api_base,
            config.chat_model.clone(),
        )
        .context("Failed to create model client")?,
    );
    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(
        ElevenLabsSynthesizer::new(config.elevenlabs_api_key.clone())
            .context("Failed to create speech synthesizer")?,
    );
    if !synthesizer.is_available() {
        warn!("ELEVENLABS_API_KEY is not set; voice mode will be unavailable.");
    }

    let app_state = Arc::new(AppState {
        llm_client,
        synthesizer,
        prompts: Arc::new(prompts),
        sessions: Arc::new(SessionRegistry::default()),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        api_base = %config.openai_api_base,
        language = %config.expected_language,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
