//! Node Configuration

use sequencer_consensus::{PeerId, RetryPolicy, SequencerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Sequencer node configuration, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// This node's index in `peer_addresses`
    pub sequencer_id: PeerId,
    /// HTTP RPC bind address
    pub listen_addr: String,
    /// Every sequencer's RPC address, in id order
    pub peer_addresses: Vec<String>,
    /// Stake weight per sequencer id
    pub stake_weights: HashMap<PeerId, u64>,
    /// bs58 Ed25519 public keys, in id order
    pub public_keys: Vec<String>,
    /// bs58 Ed25519 secret key of this node
    pub secret_key: String,
    /// Carrier balances at genesis
    pub initial_balances: HashMap<String, i64>,
    /// Round length before a timeout is sent
    pub round_timeout_ms: u64,
    /// Delay between forming a certificate and broadcasting the next block
    pub block_time_ms: u64,
    /// Delivery attempts per message
    pub retry_attempts: u32,
    /// Pause between delivery attempts
    pub retry_delay_ms: u64,
    /// Outbound request timeout
    pub request_timeout_ms: u64,
    pub mempool_capacity: usize,
    pub max_txs_per_block: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            sequencer_id: 0,
            listen_addr: "127.0.0.1:7000".to_string(),
            peer_addresses: vec!["127.0.0.1:7000".to_string()],
            stake_weights: HashMap::new(),
            public_keys: Vec::new(),
            secret_key: String::new(),
            initial_balances: HashMap::new(),
            round_timeout_ms: 5_000,
            block_time_ms: 1_000,
            retry_attempts: retry.max_attempts,
            retry_delay_ms: retry.delay.as_millis() as u64,
            request_timeout_ms: 10_000,
            mempool_capacity: 4096,
            max_txs_per_block: 64,
        }
    }
}

impl NodeConfig {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let peers = self.peer_addresses.len();
        if peers == 0 {
            return Err(ConfigError::Invalid("peerAddresses is empty".to_string()));
        }
        if self.sequencer_id as usize >= peers {
            return Err(ConfigError::Invalid(format!(
                "sequencerId {} is not in the {} peer addresses",
                self.sequencer_id, peers
            )));
        }
        if self.public_keys.len() != peers {
            return Err(ConfigError::Invalid(format!(
                "{} public keys for {} peers",
                self.public_keys.len(),
                peers
            )));
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::Invalid("secretKey is missing".to_string()));
        }
        if self.round_timeout_ms == 0 {
            return Err(ConfigError::Invalid("roundTimeoutMs must be positive".to_string()));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid("retryAttempts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            sequencer_id: self.sequencer_id,
            listen_addr: self.listen_addr.clone(),
            peer_addresses: self.peer_addresses.clone(),
            stake_weights: self.stake_weights.clone(),
            initial_balances: self.initial_balances.clone(),
            round_timeout: Duration::from_millis(self.round_timeout_ms),
            mempool_capacity: self.mempool_capacity,
            max_txs_per_block: self.max_txs_per_block,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
