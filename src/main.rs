//! # Stack Deployer
//!
//! Binary entry point: crypto provider setup, tracing, CLI dispatch.

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    // We use ring as the crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stack_deployer=info".into()),
        )
        .init();

    info!(
        "Starting Stack Deployer (build: timestamp={}, datetime={}, git_hash={})",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    stack_deployer::cli::run().await
}
