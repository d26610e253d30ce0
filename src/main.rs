use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use keywarden::{
    KeyLifecycleManager, RotationScheduler,
    config::{self, Settings},
    generator::RsaKeyGenerator,
    server::{self, AppState},
    store::SqliteKeyMaterialStore,
    telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load_config().context("invalid configuration")?;
    let _guard = telemetry::init(&settings.telemetry)?;

    let manager = Arc::new(build_manager(&settings)?);
    let rotation = RotationScheduler::start(manager.clone());

    let state = Arc::new(AppState {
        issuer: settings.issuer.clone(),
        keys: manager,
    });
    let app = server::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    rotation.stop().await;
    Ok(())
}

fn build_manager(settings: &Settings) -> anyhow::Result<KeyLifecycleManager> {
    let generator = RsaKeyGenerator::new(settings.signing.rsa_key_size, settings.signing.algorithm)?;
    let mut builder = KeyLifecycleManager::builder(settings.key_rotation.clone())
        .generator(Arc::new(generator));

    match &settings.persistence {
        Some(persistence) => {
            let store = SqliteKeyMaterialStore::open(&persistence.database_path)
                .with_context(|| format!("failed to open {}", persistence.database_path))?;
            info!(path = %persistence.database_path, "persisting signing keys");
            builder = builder.persistence(Arc::new(store), persistence.sealer()?);
        }
        None => info!("no persistence configured, keys are kept in memory only"),
    }

    Ok(builder.build()?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutdown signal received");
}
