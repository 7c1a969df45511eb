use clap::Parser;
use tracing::info;

use murmur::chat::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::parse();
    info!("murmur {} — single-loop chat server", env!("CARGO_PKG_VERSION"));

    murmur::chat::server::run(&config).await
}
