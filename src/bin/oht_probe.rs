//! Probe binary - checks OHT credentials and connectivity before the
//! translator is enabled
//!
//! Usage:
//!   cargo run --bin oht-probe
//!
//! Reads the same environment as the gateway (see `Config::from_env`).

use anyhow::{bail, Result};
use oht_gateway::client::OhtClient;
use oht_gateway::config::Config;
use oht_gateway::language::LanguageCache;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("oht_gateway=info".parse()?)
                .add_directive("oht_probe=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    if !config.is_available() {
        bail!("OHT_PUBLIC_KEY and OHT_SECRET_KEY must both be non-empty");
    }

    info!(
        "Probing OHT at {} ({})",
        config.api_root(),
        if config.use_sandbox { "sandbox" } else { "production" }
    );

    let client = OhtClient::new(&config)?;

    let account = client.account_details().await?;
    info!(
        "✓ Account {} ({}), credits: {}",
        account.account_username.as_deref().unwrap_or("unknown"),
        account.account_id.as_deref().unwrap_or("-"),
        account
            .credits
            .map(|c| c.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );

    let cache = LanguageCache::new();
    let languages = cache.get_or_fetch(&client).await?;
    info!("✓ {} supported languages", languages.len());

    let pairs = client.supported_language_pairs().await?;
    info!("✓ {} supported language pairs", pairs.len());

    info!("Callbacks will be sent to {}", config.callback_url);

    Ok(())
}
