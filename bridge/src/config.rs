// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::eth::EvmContracts;
use crate::sync_engine::config::{DispatchRetryConfig, FetchConfig, WatcherConfig};
use crate::types::{ChainSide, Direction};
use anyhow::anyhow;
use ethers::types::Address;
use lockmint_bridge_config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    // Name used in logs, metrics and the status endpoint
    pub name: String,
    pub rpc_url: String,
    // Checked against eth_chainId on startup when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    // BridgeLock on chain A, BridgeMint on chain B
    pub bridge_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_address: Option<String>,
    // Blocks behind the tip treated as final
    #[serde(default)]
    pub confirmation_depth: u64,
    // First block scanned on a fresh ledger
    #[serde(default)]
    pub start_block: u64,
}

impl ChainConfig {
    pub fn contracts(&self) -> anyhow::Result<EvmContracts> {
        let parse = |field: &str, value: &str| {
            Address::from_str(value)
                .map_err(|e| anyhow!("[{}] invalid {} {:?}: {}", self.name, field, value, e))
        };
        Ok(EvmContracts {
            bridge: parse("bridge-address", &self.bridge_address)?,
            voting: self
                .voting_address
                .as_deref()
                .map(|a| parse("voting-address", a))
                .transpose()?,
            emergency: self
                .emergency_address
                .as_deref()
                .map(|a| parse("emergency-address", a))
                .transpose()?,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatchRetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for DispatchRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GovernanceConfig {
    // Chain whose GovernanceVoting emits ProposalPassed; the other chain is paused
    pub source: ChainSide,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerNodeConfig {
    // Chain A holds the vault
    pub chain_a: ChainConfig,
    // Chain B holds the wrapped asset
    pub chain_b: ChainConfig,
    // File holding the relayer's hex-encoded secp256k1 private key
    pub relayer_key_path: PathBuf,
    // Directory of the processed-event ledger
    pub ledger_dir: PathBuf,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_max_retry_duration_secs")]
    pub max_retry_duration_secs: u64,
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_failed_retry_interval_secs")]
    pub failed_retry_interval_secs: u64,
    #[serde(default)]
    pub dispatch_retry: DispatchRetrySettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceConfig>,
    // The port for the metrics server
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    // The port for the status server, disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_listen_port: Option<u16>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_polling_interval_ms() -> u64 {
    2_000
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_max_retry_duration_secs() -> u64 {
    600
}

fn default_submit_timeout_secs() -> u64 {
    120
}

fn default_failed_retry_interval_secs() -> u64 {
    300
}

fn default_metrics_port() -> u16 {
    9184
}

impl Config for RelayerNodeConfig {}

impl RelayerNodeConfig {
    pub fn chain(&self, side: ChainSide) -> &ChainConfig {
        match side {
            ChainSide::A => &self.chain_a,
            ChainSide::B => &self.chain_b,
        }
    }

    /// Chain whose events drive `direction`
    pub fn source_side(&self, direction: Direction) -> Option<ChainSide> {
        match direction {
            Direction::LockToMint => Some(ChainSide::A),
            Direction::BurnToUnlock => Some(ChainSide::B),
            Direction::Governance => self.governance.as_ref().map(|g| g.source),
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_block_range: self.max_block_range,
            poll_interval: self.polling_interval(),
            max_retry_duration: Duration::from_secs(self.max_retry_duration_secs),
            failed_retry_interval: Duration::from_secs(self.failed_retry_interval_secs),
        }
    }

    pub fn dispatch_retry_config(&self) -> DispatchRetryConfig {
        DispatchRetryConfig {
            max_attempts: self.dispatch_retry.max_attempts,
            initial_delay: Duration::from_millis(self.dispatch_retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.dispatch_retry.max_delay_ms),
            multiplier: self.dispatch_retry.multiplier,
            submit_timeout: self.submit_timeout(),
        }
    }

    /// Watcher settings for `direction`, taking depth and start block from its source chain.
    pub fn watcher_config(&self, direction: Direction) -> anyhow::Result<WatcherConfig> {
        let side = self
            .source_side(direction)
            .ok_or_else(|| anyhow!("[{}] direction is not configured", direction))?;
        let source = self.chain(side);
        Ok(WatcherConfig {
            direction,
            confirmation_depth: source.confirmation_depth,
            start_block: source.start_block,
            fetch: self.fetch_config(),
            dispatch: self.dispatch_retry_config(),
        })
    }

    pub fn directions(&self) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| self.source_side(*d).is_some())
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for side in [ChainSide::A, ChainSide::B] {
            let chain = self.chain(side);
            if chain.rpc_url.is_empty() {
                anyhow::bail!("[{}] rpc-url must be set", chain.name);
            }
            chain.contracts()?;
        }
        if let Some(governance) = &self.governance {
            let source = self.chain(governance.source);
            let target = self.chain(governance.source.other());
            if source.voting_address.is_none() {
                anyhow::bail!(
                    "[{}] governance source chain needs voting-address",
                    source.name
                );
            }
            if target.emergency_address.is_none() {
                anyhow::bail!(
                    "[{}] pause target chain needs emergency-address",
                    target.name
                );
            }
        }
        for direction in self.directions() {
            self.watcher_config(direction)?
                .validate()
                .map_err(|e| anyhow!(e))?;
        }
        Ok(())
    }
}
