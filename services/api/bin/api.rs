//! Main Entrypoint for the Voice Relay API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting to the database and running migrations, when one is configured.
//! 3. Initializing shared services (the agent client and the instruction corrector).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use voxrelay_api::{
    config::{AgentBackend, Config, CorrectionProvider},
    db::{Db, PgCorrectionStore},
    router::create_router,
    state::{AppState, SessionRegistry},
};
use voxrelay_core::{
    converse::{ConverseClient, HttpConverseClient, MockConverseClient},
    correction::{CorrectionStore, Corrector, InMemoryCorrectionStore, LLMCorrector, PassthroughCorrector},
};

const DEFAULT_SYSTEM_PROMPT: &str = "You are the voice of a coding agent. Whenever the user asks \
for anything, call the delegate tool with their request as the instruction, then read out what \
the agent says, word for word.";

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
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

fn build_corrector(config: &Config, prompts: HashMap<String, String>) -> anyhow::Result<Arc<dyn Corrector>> {
    let openai_config = match config.correction_provider {
        CorrectionProvider::None => {
            info!("Instruction correction disabled.");
            return Ok(Arc::new(PassthroughCorrector));
        }
        CorrectionProvider::OpenAI => {
            info!("Using OpenAI for instruction correction.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is required for the openai correction provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/")
        }
        CorrectionProvider::Gemini => {
            info!("Using Gemini for instruction correction.");
            OpenAIConfig::new()
                .with_api_key(&config.gemini_api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai")
        }
    };
    if !prompts.contains_key("correct_instruction") {
        warn!("correct_instruction.md not found in prompts directory; corrections will fall back to the raw instruction");
    }
    Ok(Arc::new(LLMCorrector::new(
        openai_config,
        config.correction_model.clone(),
        prompts,
    )))
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

    // --- 3. Initialize Database ---
    let db = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let db = Arc::new(Db::new(pool));
            db.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Some(db)
        }
        None => {
            warn!("DATABASE_URL not set. Corrections are kept in memory and turns are not persisted.");
            None
        }
    };
    let corrections: Arc<dyn CorrectionStore> = match &db {
        Some(db) => Arc::new(PgCorrectionStore::new(db.clone())),
        None => Arc::new(InMemoryCorrectionStore::default()),
    };

    // --- 4. Initialize Shared Services ---
    let prompts = match load_prompts(&config.prompts_path) {
        Ok(prompts) => prompts,
        Err(e) => {
            warn!(path = %config.prompts_path.display(), error = %e, "Could not read prompts directory, using defaults");
            HashMap::new()
        }
    };
    let system_prompt = Arc::new(
        prompts
            .get("system_prompt")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
    );
    let corrector = build_corrector(&config, prompts)?;

    let converse_client: Arc<dyn ConverseClient> = match config.agent_backend {
        AgentBackend::Http => {
            info!(url = %config.agent_url, "Using HTTP agent backend.");
            Arc::new(HttpConverseClient::new(config.agent_url.clone()))
        }
        AgentBackend::Mock => {
            info!("Using mock agent backend.");
            Arc::new(MockConverseClient::default())
        }
    };

    let app_state = Arc::new(AppState {
        db,
        converse_client,
        corrector,
        corrections,
        relay_config: Arc::new(config.relay_config()),
        system_prompt,
        config: Arc::new(config.clone()),
        sessions: Arc::new(SessionRegistry::default()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        live_model = %config.live_model,
        agent_backend = ?config.agent_backend,
        interaction_mode = %config.interaction_mode,
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
