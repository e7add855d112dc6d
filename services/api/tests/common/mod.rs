use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::Level;
use voxrelay_api::{
    config::{AgentBackend, Config, CorrectionProvider},
    state::{AppState, SessionRegistry},
};
use voxrelay_core::{
    approval::InteractionMode,
    chunker::ChunkerConfig,
    converse::ConverseClient,
    correction::{CorrectionStore, PassthroughCorrector},
};

pub fn test_config(live_url: &str) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: None,
        gemini_api_key: "test-key".to_string(),
        live_url: live_url.to_string(),
        live_model: "models/test-live".to_string(),
        agent_backend: AgentBackend::Mock,
        agent_url: "http://127.0.0.1:9/api/converse".to_string(),
        interaction_mode: InteractionMode::Direct,
        correction_provider: CorrectionProvider::None,
        openai_api_key: None,
        correction_model: "test-model".to_string(),
        unfreeze_delay: Duration::from_secs(2),
        chunk_flush: Duration::from_millis(200),
        chunk_min_chars: ChunkerConfig::default().min_chars,
        log_level: Level::DEBUG,
        prompts_path: PathBuf::from("./prompts"),
    }
}

pub fn test_state(
    config: Config,
    converse_client: Arc<dyn ConverseClient>,
    corrections: Arc<dyn CorrectionStore>,
) -> Arc<AppState> {
    Arc::new(AppState {
        db: None,
        converse_client,
        corrector: Arc::new(PassthroughCorrector),
        corrections,
        relay_config: Arc::new(config.relay_config()),
        system_prompt: Arc::new("Relay every request to the agent.".to_string()),
        config: Arc::new(config),
        sessions: Arc::new(SessionRegistry::default()),
    })
}
