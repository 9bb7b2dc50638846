//! Strokeboard relay binary.

use clap::Parser;
use strokeboard_relay::{RelayConfig, serve};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strokeboard_relay=info,tower_http=info".into()),
        )
        .init();

    serve(RelayConfig::parse()).await
}
