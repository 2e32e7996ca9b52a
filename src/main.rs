use std::sync::Arc;

use tracing::{error, info, warn};

use stowage::{
    build_backend, CapabilityIssuer, Config, Database, EngineOptions, FileEngine, WebServer,
};

#[tokio::main]
async fn main() {
    // Load configuration
    let (config, load_error) = match Config::load_with_env("config.toml") {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = Config::default();
            config.apply_env_overrides();
            (config, Some(e))
        }
    };

    // Initialize logging
    if let Err(e) = stowage::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        stowage::logging::init_console_only(&config.logging.level);
    }

    if let Some(e) = load_error {
        warn!("Failed to load config.toml: {}. Using default configuration.", e);
    }

    if let Err(e) = run(config).await {
        error!("stowage stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> stowage::Result<()> {
    config.validate()?;

    info!("stowage - per-owner file storage");
    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    let db = Database::open(&config.database.path).await?;
    let backend = build_backend(&config.storage)?;
    let engine = Arc::new(FileEngine::new(
        db,
        backend,
        CapabilityIssuer::new(&config.auth.capability_secret),
        EngineOptions::from_config(&config),
    ));

    WebServer::from_config(&config, engine)?.run().await?;
    Ok(())
}
