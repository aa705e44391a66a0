//! Configuration for the bridge.
//!
//! Settings are loaded with priority: env var > default. A host embedding
//! the bridge calls `BridgeConfig::load()` once at startup after loading
//! any `.env` file via dotenvy.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Persisted-state storage key used when none is configured.
pub const DEFAULT_STATE_STORAGE_KEY: &str = "walletState";

/// Tunable knobs for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Upper bound on the safety delay between dependent signing
    /// operations on the same chain.
    pub max_presign_delay: Duration,
    /// Ledger entries older than this are eligible for the orphan sweep.
    pub ledger_sweep_age: Duration,
    /// Key under which the persisted-state envelope lives in storage.
    pub state_storage_key: String,
    /// Chain assumed when a request carries no chain id.
    pub default_chain_id: u64,
    /// Per-chain provider URLs echoed in chain-change responses.
    pub provider_urls: HashMap<u64, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let mut provider_urls = HashMap::new();
        provider_urls.insert(1, "https://cloudflare-eth.com".to_string());
        provider_urls.insert(137, "https://polygon-rpc.com".to_string());
        Self {
            max_presign_delay: Duration::from_millis(1500),
            ledger_sweep_age: Duration::from_secs(24 * 60 * 60),
            state_storage_key: DEFAULT_STATE_STORAGE_KEY.to_string(),
            default_chain_id: 1,
            provider_urls,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let max_presign_delay = optional_env("WALLET_BRIDGE_MAX_PRESIGN_DELAY_MS")
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "WALLET_BRIDGE_MAX_PRESIGN_DELAY_MS".to_string(),
                message: format!("must be a delay in milliseconds: {e}"),
            })?
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_presign_delay);

        let ledger_sweep_age = optional_env("WALLET_BRIDGE_LEDGER_SWEEP_AGE_SECS")
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "WALLET_BRIDGE_LEDGER_SWEEP_AGE_SECS".to_string(),
                message: format!("must be an age in seconds: {e}"),
            })?
            .map(Duration::from_secs)
            .unwrap_or(defaults.ledger_sweep_age);

        let default_chain_id = optional_env("WALLET_BRIDGE_DEFAULT_CHAIN_ID")
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "WALLET_BRIDGE_DEFAULT_CHAIN_ID".to_string(),
                message: format!("must be a numeric chain id: {e}"),
            })?
            .unwrap_or(defaults.default_chain_id);

        let state_storage_key = optional_env("WALLET_BRIDGE_STATE_KEY")
            .unwrap_or(defaults.state_storage_key);

        Ok(Self {
            max_presign_delay,
            ledger_sweep_age,
            state_storage_key,
            default_chain_id,
            provider_urls: defaults.provider_urls,
        })
    }
}

/// Read an env var, treating unset and empty as absent.
fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}
