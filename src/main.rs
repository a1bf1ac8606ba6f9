use e2e_control::api::router;
use e2e_control::auth::Credential;
use e2e_control::error::ControlError;
use e2e_control::executor::SystemExecutor;
use e2e_control::logging::{FileLogger, setup_logging};
use e2e_control::maintenance::Maintenance;
use e2e_control::orchestrator::DeployOrchestrator;
use e2e_control::{AppState, load_config};
use std::sync::Arc;
use tracing::info;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "e2e_control.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        eprintln!("e2e_control: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ControlError> {
    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path =
        std::env::var("E2E_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = load_config(&config_path)?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }

    let credential = Credential::new(std::env::var("API_KEY").unwrap_or_default())?;

    let file_logger = config.logging.directory.clone().map(FileLogger::new);
    // Held until shutdown so buffered file logs are flushed
    let _log_guard = setup_logging(file_logger.as_ref())?;

    let maintenance = Maintenance::connect_lazy(&config.database)?;
    let orchestrator = DeployOrchestrator::new(config.deploy.clone(), Arc::new(SystemExecutor));
    let state = Arc::new(AppState::new(credential, orchestrator, maintenance));

    let app = router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    info!(
        "Deploying into {} from remote '{}'",
        config.deploy.repo_path.display(),
        config.deploy.remote
    );

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
