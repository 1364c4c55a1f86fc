use std::process::ExitCode;
use std::sync::Arc;

use stowage::config::{self, AppConfig};
use stowage::engine::Engine;
use stowage::repository::InMemoryRepository;
use stowage::{api, logging};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_result = dotenvy::dotenv();

    let log_format = config::log_format_from_env();
    logging::init(log_format.clone().unwrap_or_default());
    if let Err(raw) = log_format {
        warn!(value = %raw, "Unknown STOWAGE_LOG_FORMAT; using pretty output");
    }
    if let Err(err) = dotenv_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!(error = %err, "Could not load .env");
        }
    }

    let app_config = AppConfig::from_env();
    let engine_config = app_config.planning.engine_config();
    info!(
        allow_rotation = engine_config.placement.allow_rotation,
        faces = ?engine_config.retrieval.faces,
        attempts = engine_config.commit_attempts,
        "Stowage service starting"
    );

    let repository = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(Engine::new(repository, engine_config));

    match api::start_api_server(app_config.api, engine).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "API server terminated with an error");
            ExitCode::FAILURE
        }
    }
}
