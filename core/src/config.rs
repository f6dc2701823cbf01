use crate::address::Address;
use crate::errors::ConfigurationError;
use crate::rpc_provider::RpcEndpoint;
use crate::wallet::LocalKey;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use serde::Deserialize;
use std::time::Duration;

/// Settings exactly as read from the environment / `.env`.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    rpc_url: String,
    rpc_fallback_urls: Option<String>,
    rpc_auth_header: Option<String>,
    rpc_auth_value: Option<String>,
    token_contract: Option<String>,
    staking_contract: Option<String>,
    private_key: Option<String>,
    account_index: usize,
    server_port: u16,
    poll_interval_ms: u64,
    confirmation_timeout_secs: u64,
    request_timeout_secs: u64,
    health_check_interval_secs: u64,
}

/// Validated client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Primary endpoint first, then fallbacks in the order given.
    pub rpc_endpoints: Vec<RpcEndpoint>,
    pub token_contract: Address,
    pub staking_contract: Address,
    /// Sign locally with this key instead of using node-managed accounts.
    pub private_key: Option<LocalKey>,
    pub account_index: usize,
    pub server_port: u16,
    pub poll_interval: Duration,
    /// `None` waits for confirmations indefinitely.
    pub confirmation_timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub health_check_interval: Duration,
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("rpc_url", "http://localhost:8545")?
        .set_default("account_index", 0)?
        .set_default("server_port", 8080)?
        .set_default("poll_interval_ms", 1000)?
        .set_default("confirmation_timeout_secs", 0)?
        .set_default("request_timeout_secs", 30)?
        .set_default("health_check_interval_secs", 30)
}

/// Load and validate configuration from the process environment.
pub fn load_config() -> Result<ClientConfig, ConfigurationError> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let settings = with_defaults(Config::builder())?
        .add_source(config::Environment::default())
        .build()?;

    ClientConfig::from_raw(settings.try_deserialize()?)
}

fn contract_address(key: &'static str, value: Option<String>) -> Result<Address, ConfigurationError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigurationError::Missing { key })?;
    value
        .parse()
        .map_err(|source| ConfigurationError::InvalidAddress { key, value, source })
}

fn local_key(value: Option<String>) -> Result<Option<LocalKey>, ConfigurationError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(key) => key
            .parse()
            .map(Some)
            .map_err(|_| ConfigurationError::InvalidPrivateKey { key: "private_key" }),
    }
}

impl ClientConfig {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigurationError> {
        let token_contract = contract_address("token_contract", raw.token_contract)?;
        let staking_contract = contract_address("staking_contract", raw.staking_contract)?;
        let private_key = local_key(raw.private_key)?;

        let mut primary = RpcEndpoint::new("primary", raw.rpc_url.trim());
        primary.auth_header = raw.rpc_auth_header;
        primary.auth_value = raw.rpc_auth_value;

        let fallbacks = raw
            .rpc_fallback_urls
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .enumerate()
            .map(|(i, url)| RpcEndpoint::new(format!("fallback-{}", i + 1), url));

        let rpc_endpoints = std::iter::once(primary).chain(fallbacks).collect();

        Ok(Self {
            rpc_endpoints,
            token_contract,
            staking_contract,
            private_key,
            account_index: raw.account_index,
            server_port: raw.server_port,
            poll_interval: Duration::from_millis(raw.poll_interval_ms.max(1)),
            confirmation_timeout: (raw.confirmation_timeout_secs > 0)
                .then(|| Duration::from_secs(raw.confirmation_timeout_secs)),
            request_timeout: Duration::from_secs(raw.request_timeout_secs),
            health_check_interval: Duration::from_secs(raw.health_check_interval_secs.max(1)),
        })
    }
}
