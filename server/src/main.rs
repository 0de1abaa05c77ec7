use std::sync::Arc;

use txqueue_core::signer::EoaSigner;
use txqueue_engine::{
    chains::build_chain_service,
    config,
    http::server::{EngineServer, EngineServerState},
    queue::manager::QueueManager,
};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_config()?;

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to debug for the engine crates if RUST_LOG environment variable is not set
            "txqueue_engine=debug,txqueue_executors=debug,txqueue_core=debug,tower_http=debug,axum=debug"
                .into()
        }));

    match config.server.log_format {
        config::LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        config::LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let chains = Arc::new(build_chain_service(&config.chains)?);
    tracing::info!(chains = ?config.chains.iter().map(|c| c.settings.chain_id).collect::<Vec<_>>(), "Chains initialized");

    let eoa_signer = Arc::new(EoaSigner::from_private_keys(&config.wallets.private_keys)?);
    tracing::info!(wallets = ?eoa_signer.addresses(), "Wallet signers initialized");

    let queue_manager = QueueManager::new(
        &config.redis,
        &config.store,
        &config.queue,
        &config.gas,
        chains,
        eoa_signer,
    )
    .await?;

    tracing::info!("Queue manager initialized");

    // Start queue workers
    tracing::info!("Starting queue workers...");
    let all_workers = queue_manager.start_workers();

    let mut server = EngineServer::new(EngineServerState {
        queue_manager: Arc::new(queue_manager),
    })
    .await;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    server.start(listener)?;

    tracing::info!("Servers started, waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received");

    tracing::info!("Starting coordinated shutdown");

    if let Err(e) = server.shutdown().await {
        tracing::error!("Error during coordinated shutdown: {}", e);
    } else {
        tracing::info!("All servers shut down successfully");
    }

    if let Err(e) = all_workers.shutdown().await {
        tracing::error!("Error during coordinated shutdown: {}", e);
    } else {
        tracing::info!("All workers shut down successfully");
    }

    Ok(())
}
