//! ari-metadata-adapter - Remote metadata adapter
//!
//! Attaches a metadata provider with the default policy to an ARI proxy.

use ari_adapter::{attach_metadata_provider, Config, MetadataProvider, ProviderKind};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if ARI_CONFIG is set, then env overrides)
    let config_path = std::env::var("ARI_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate(ProviderKind::Metadata) {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting ARI metadata adapter");
    tracing::info!("  Proxy host: {}", config.proxy.host);
    if let Some(port) = config.proxy.metadata_port {
        tracing::info!("  Metadata port: {}", port);
    }
    tracing::info!(
        "  TLS: {}",
        if config.tls.enabled { "enabled" } else { "disabled" }
    );
    if config.keepalive.interval_ms > 0 {
        tracing::info!("  Keepalive: {} ms", config.keepalive.interval_ms);
    } else {
        tracing::info!("  Keepalive: proxy hint only");
    }

    let mut attached = attach_metadata_provider(&config, MetadataProvider::builder()).await?;

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, closing session...");
            Ok(())
        }
        result = attached.join() => result,
    };

    attached.shutdown();
    match result {
        Ok(()) => {
            tracing::info!("Adapter stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Adapter stopped: {}", e);
            Err(e.into())
        }
    }
}
