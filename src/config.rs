use crate::retry::RetryConfig;
use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Production API root.
pub const PRODUCTION_URL: &str = "https://api.onehourtranslation.com/api";

/// Sandbox API root.
pub const SANDBOX_URL: &str = "https://sandbox.onehourtranslation.com/api";

/// Version segment prefixed to every resource path.
pub const API_VERSION: &str = "2";

/// Provider key pair plus environment flag. Borrowed per call, never stored
/// by the gateway beyond the lifetime of its `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredential {
    pub public_key: String,
    pub secret_key: String,
    pub use_sandbox: bool,
}

impl RemoteCredential {
    /// Sandbox keys only work against the sandbox host.
    pub fn base_url(&self) -> &'static str {
        if self.use_sandbox {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // OHT API
    pub oht_public_key: String,
    pub oht_secret_key: String,
    pub use_sandbox: bool,
    /// Replaces the production/sandbox root when set
    pub api_base_url: Option<String>,
    pub request_timeout: Duration,
    pub debug: bool,

    // Callbacks
    pub callback_url: String,
    pub callback_secret: String,

    // Reconciliation
    pub reconcile_interval_minutes: u32,
    pub reconcile_concurrency: usize,

    // Language mapping overrides (local tag, remote tag)
    pub language_overrides: Vec<(String, String)>,

    // Retries for idempotent reads
    pub retry: RetryConfig,

    // Webhook server
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let language_overrides = match std::env::var("OHT_LANGUAGE_OVERRIDES") {
            Ok(raw) => parse_language_overrides(&raw)?,
            Err(_) => Vec::new(),
        };

        let reconcile_interval_minutes = std::env::var("OHT_RECONCILE_INTERVAL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);
        if !(1..=59).contains(&reconcile_interval_minutes) {
            bail!(
                "OHT_RECONCILE_INTERVAL_MINUTES must be between 1 and 59, got {}",
                reconcile_interval_minutes
            );
        }

        Ok(Self {
            // OHT API
            oht_public_key: std::env::var("OHT_PUBLIC_KEY").context("OHT_PUBLIC_KEY not set")?,
            oht_secret_key: std::env::var("OHT_SECRET_KEY").context("OHT_SECRET_KEY not set")?,
            use_sandbox: std::env::var("OHT_USE_SANDBOX")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            api_base_url: std::env::var("OHT_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            request_timeout: Duration::from_secs(
                std::env::var("OHT_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            debug: std::env::var("OHT_DEBUG")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),

            // Callbacks
            callback_url: std::env::var("OHT_CALLBACK_URL")
                .context("OHT_CALLBACK_URL not set")?,
            callback_secret: std::env::var("OHT_CALLBACK_SECRET")
                .context("OHT_CALLBACK_SECRET not set")?,

            // Reconciliation
            reconcile_interval_minutes,
            reconcile_concurrency: std::env::var("OHT_RECONCILE_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),

            language_overrides,
            retry: RetryConfig::provider_read(),

            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        })
    }

    pub fn credential(&self) -> RemoteCredential {
        RemoteCredential {
            public_key: self.oht_public_key.clone(),
            secret_key: self.oht_secret_key.clone(),
            use_sandbox: self.use_sandbox,
        }
    }

    /// API root including the version segment, without a trailing slash.
    pub fn api_root(&self) -> String {
        self.api_root_for(&self.credential())
    }

    /// Like [`Config::api_root`], with the environment taken from `credential`.
    pub fn api_root_for(&self, credential: &RemoteCredential) -> String {
        let base = self
            .api_base_url
            .as_deref()
            .unwrap_or_else(|| credential.base_url());
        format!("{}/{}", base.trim_end_matches('/'), API_VERSION)
    }

    /// The translator can only talk to OHT with both keys configured.
    pub fn is_available(&self) -> bool {
        !self.oht_public_key.trim().is_empty() && !self.oht_secret_key.trim().is_empty()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse `local:remote` pairs separated by commas, e.g. `pt:pt-br,fr:fr-ca`.
pub fn parse_language_overrides(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((local, remote)) if !local.trim().is_empty() && !remote.trim().is_empty() => Ok((
                local.trim().to_ascii_lowercase(),
                remote.trim().to_ascii_lowercase(),
            )),
            _ => bail!("Invalid language override '{}'. Expected local:remote", pair),
        })
        .collect()
}
