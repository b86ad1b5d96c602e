// Copyright 2023 Proof Market Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

const fn default_reconnect_interval() -> u64 {
    10_000
}

const fn default_reconciliation_interval() -> u64 {
    10_000
}

const fn enabled_default() -> bool {
    true
}

const fn max_blocks_per_step_default() -> u64 {
    100
}

const fn print_progress_interval_default() -> u64 {
    7_000
}

/// RelayerConfig is the configuration for the proof market relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// The ledger (contract + RPC endpoints) this relayer bridges.
    pub ledger: LedgerConfig,
    /// The marketplace service this relayer bridges.
    pub market: MarketServiceConfig,
    /// Controls the marketplace -> ledger reconciliation loop.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Controls the order book price relay.
    #[serde(default)]
    pub price_relay: PriceRelayConfig,
}

/// LedgerConfig is the configuration for the ledger side of the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerConfig {
    /// Http(s) Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub http_endpoint: url::Url,
    /// Websocket Endpoint for long living connections
    #[serde(skip_serializing)]
    pub ws_endpoint: url::Url,
    /// chain specific id.
    #[serde(rename(serialize = "chainId"))]
    pub chain_id: u64,
    /// Address of the deployed proof market endpoint contract.
    pub contract_address: Address,
    /// The block number where the contract was deployed. Event replay on a
    /// fresh checkpoint starts here instead of the genesis block.
    #[serde(default)]
    pub deployed_at: u64,
    /// The Private Key of the relayer account on this network.
    /// the format is more dynamic here:
    /// 1. if it starts with '0x' then this would be raw (64 bytes) hex encoded
    ///    private key.
    /// 2. if it starts with '$' then it would be considered as an Enviroment variable
    ///    of a hex-encoded private key.
    ///   Example: $PROOF_MARKET_PRIVATE_KEY
    #[serde(skip_serializing)]
    pub private_key: PrivateKey,
    /// Milliseconds to wait before re-establishing a dropped subscription.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Controls the events watcher
    #[serde(rename(serialize = "eventsWatcher"), default)]
    pub events_watcher: EventsWatcherConfig,
}

impl LedgerConfig {
    /// Backoff delay between reconnect attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }
}

/// EventsWatcherConfig is the configuration for the events watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventsWatcherConfig {
    /// if it is enabled for this chain or not.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// The maximum number of blocks to query for events in one request.
    #[serde(skip_serializing, default = "max_blocks_per_step_default")]
    pub max_blocks_per_step: u64,
    /// print sync progress frequency in milliseconds
    /// if it is zero, means no progress will be printed.
    #[serde(skip_serializing, default = "print_progress_interval_default")]
    pub print_progress_interval: u64,
}

impl Default for EventsWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: enabled_default(),
            max_blocks_per_step: max_blocks_per_step_default(),
            print_progress_interval: print_progress_interval_default(),
        }
    }
}

/// MarketServiceConfig is the configuration for the marketplace service
/// REST API.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarketServiceConfig {
    /// Base URL of the marketplace service.
    pub url: url::Url,
    /// Basic auth username; also the `sender` the relayer's work requests
    /// are filed under.
    pub username: String,
    /// Basic auth password.
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for MarketServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketServiceConfig")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .finish()
    }
}

/// ReconciliationConfig is the configuration for the reconciliation loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReconciliationConfig {
    /// if the reconciliation loop is enabled or not.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Polling interval in milliseconds.
    #[serde(default = "default_reconciliation_interval")]
    pub interval: u64,
}

impl ReconciliationConfig {
    /// Delay between reconciliation ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: enabled_default(),
            interval: default_reconciliation_interval(),
        }
    }
}

/// PriceRelayConfig is the configuration for the order book price relay.
///
/// Disabled by default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PriceRelayConfig {
    /// if the price relay is enabled or not.
    #[serde(default)]
    pub enabled: bool,
    /// Polling interval in milliseconds.
    #[serde(default = "default_reconciliation_interval")]
    pub interval: u64,
}

impl PriceRelayConfig {
    /// Delay between price relay ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

impl Default for PriceRelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_reconciliation_interval(),
        }
    }
}

/// The relayer account's private key.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = H256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVistor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVistor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value.starts_with("0x") {
                    // hex value
                    let maybe_hex = H256::from_str(value);
                    match maybe_hex {
                        Ok(val) => Ok(val),
                        Err(e) => Err(serde::de::Error::custom(format!("{}\n got {} but expected a 66 chars string (including the 0x prefix)", e, value))),
                    }
                } else if value.starts_with('$') {
                    // env
                    let var = value.strip_prefix('$').unwrap_or(value);
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {}: {}",
                            var, e,
                        ))
                    })?;
                    let maybe_hex = H256::from_str(&val);
                    match maybe_hex {
                        Ok(val) => Ok(val),
                        Err(e) => Err(serde::de::Error::custom(format!("{}\n got {} but expected a 66 chars string (including the 0x prefix) but found {} char", e, val, val.len()))),
                    }
                } else {
                    Err(serde::de::Error::custom(
                        "expected a 0x-prefixed hex string or a $ENV_VAR reference",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVistor)?;
        Ok(Self(secret))
    }
}

/// Load the configuration from the given directory, merging every TOML or
/// JSON file found there with the `PROOF_MARKET_*` environment.
pub fn load<P: AsRef<Path>>(path: P) -> crate::error::Result<RelayerConfig> {
    let mut cfg = config::Config::new();
    // A pattern that covers all toml or json files in the config directory
    // and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", path.as_ref().display());
    let json_pattern = format!("{}/**/*.json", path.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let config_files = glob::glob(&toml_pattern)?
        .flatten()
        .chain(glob::glob(&json_pattern)?.flatten());
    for config_file in config_files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        let file = config::File::from(config_file).format(format);
        if let Err(e) = cfg.merge(file) {
            tracing::warn!("Error while loading config file: {} skipping!", e);
            continue;
        }
    }
    // also merge in the environment (with a prefix of PROOF_MARKET).
    cfg.merge(config::Environment::with_prefix("PROOF_MARKET").separator("_"))?;
    // and finally deserialize the config with the path to any bad value
    // included in the error.
    let config: Result<
        RelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    config.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_parses_raw_hex() {
        let json = serde_json::json!(
            "0x000000000000000000000000000000000000000000000000000000000000002a"
        );
        let key: PrivateKey = serde_json::from_value(json).unwrap();
        assert_eq!(key.0, H256::from_low_u64_be(42));
    }

    #[test]
    fn private_key_reads_env_indirection() {
        std::env::set_var(
            "TEST_RELAYER_PK",
            "0x0000000000000000000000000000000000000000000000000000000000000007",
        );
        let json = serde_json::json!("$TEST_RELAYER_PK");
        let key: PrivateKey = serde_json::from_value(json).unwrap();
        assert_eq!(key.0, H256::from_low_u64_be(7));
    }

    #[test]
    fn private_key_rejects_other_formats() {
        let json = serde_json::json!("twelve words of a mnemonic phrase");
        let key: Result<PrivateKey, _> = serde_json::from_value(json);
        assert!(key.is_err());
    }

    #[test]
    fn full_config_parses_with_defaults() {
        let raw = serde_json::json!({
            "ledger": {
                "http-endpoint": "http://localhost:8545",
                "ws-endpoint": "ws://localhost:8546",
                "chain-id": 31337,
                "contract-address":
                    "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                "private-key":
                    "0x0000000000000000000000000000000000000000000000000000000000000001",
            },
            "market": {
                "url": "http://localhost:8080",
                "username": "relayer",
                "password": "hunter2",
            },
        });
        let config: RelayerConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.ledger.chain_id, 31337);
        assert_eq!(config.ledger.reconnect_interval, 10_000);
        assert_eq!(config.ledger.deployed_at, 0);
        assert!(config.ledger.events_watcher.enabled);
        assert_eq!(config.ledger.events_watcher.max_blocks_per_step, 100);
        assert!(config.reconciliation.enabled);
        assert_eq!(config.reconciliation.interval, 10_000);
        // the price relay ships disabled.
        assert!(!config.price_relay.enabled);
        assert_eq!(config.market.username, "relayer");
    }
}
