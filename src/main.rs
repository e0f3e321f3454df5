use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};

use cartograph::cli::Cli;
use cartograph::error::CartographError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    info!("Starting cartograph v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli.execute().await {
        // Quota exhaustion gets its own exit code so callers can surface a
        // specific message.
        if matches!(
            e.downcast_ref::<CartographError>(),
            Some(CartographError::QuotaExhausted { .. })
        ) {
            eprintln!("error: {e}");
            std::process::exit(69);
        }
        return Err(e);
    }
    Ok(())
}
