//! Core types for block sequencing and vote collection

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Index of a sequencer in the configured peer address list
pub type PeerId = u32;

/// Block height
pub type Height = u64;

/// Rounds spent at one height without confirming the next block
pub type Round = u64;

/// An attestation token produced by a signature scheme
#[derive(Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Signature {
    /// Peer that claims to have produced this signature
    pub signer: PeerId,
    /// Raw signature bytes
    pub bytes: Vec<u8>,
}

/// A transaction carried by a block
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Carrier whose balance pays for the gas
    pub sender_address: String,
    /// Target contract (opaque to the sequencer)
    pub contract_address: String,
    /// Gas charged to the sender on acceptance
    pub gas_limit: u64,
}

/// A proposed block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Height this block would confirm
    pub height: Height,
    /// Leader's signature over the block hash
    #[serde(default)]
    pub leader_signature: Option<Signature>,
    /// Quorum certificate for the previous block
    #[serde(default)]
    pub qc: Vec<Signature>,
    /// Timeout certificate for the previous block
    #[serde(default)]
    pub tc: Vec<Signature>,
    /// Transactions in execution order
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The implicit block at height 0 every sequencer starts from
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Compute the hash of this block (bs58 text of a blake3 digest).
    ///
    /// The leader signature is excluded so the leader can sign the hash itself.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&borsh::to_vec(&self.qc).unwrap_or_default());
        hasher.update(&borsh::to_vec(&self.tc).unwrap_or_default());
        hasher.update(&borsh::to_vec(&self.transactions).unwrap_or_default());
        bs58::encode(hasher.finalize().as_bytes()).into_string()
    }

    /// Total gas charged by this block
    pub fn total_gas(&self) -> u64 {
        self.transactions
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.gas_limit))
    }
}

/// Hash of the genesis block
pub fn genesis_hash() -> String {
    Block::genesis().hash()
}

/// A vote for the block with hash `prev_hash` at `height`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedResponse {
    pub height: Height,
    pub prev_hash: String,
    pub signature: Signature,
}

/// Signals that no proposal extending `prev_hash` arrived in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTimeout {
    pub height: Height,
    pub prev_hash: String,
    /// Round the sender gave up on; picks the collector
    #[serde(default)]
    pub round: Round,
    pub signature: Signature,
}

/// Configuration for a sequencer
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// This node's identity (index into `peer_addresses`)
    pub sequencer_id: PeerId,
    /// Address the RPC server listens on
    pub listen_addr: String,
    /// Ordered list of every sequencer's address, this node included
    pub peer_addresses: Vec<String>,
    /// Stake weight per sequencer
    pub stake_weights: HashMap<PeerId, u64>,
    /// Balances seeded into the ledger at startup
    pub initial_balances: HashMap<String, i64>,
    /// How long a round may pass without a confirmed block before a timeout is sent
    pub round_timeout: Duration,
    /// Pending transaction capacity
    pub mempool_capacity: usize,
    /// Maximum transactions drained into one proposal
    pub max_txs_per_block: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            sequencer_id: 0,
            listen_addr: "127.0.0.1:7000".to_string(),
            peer_addresses: vec!["127.0.0.1:7000".to_string()],
            stake_weights: HashMap::new(),
            initial_balances: HashMap::new(),
            round_timeout: Duration::from_secs(5),
            mempool_capacity: 4096,
            max_txs_per_block: 64,
        }
    }
}

impl SequencerConfig {
    /// Number of configured peers
    pub fn peer_count(&self) -> usize {
        self.peer_addresses.len()
    }
}

/// Snapshot of a sequencer's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerStatus {
    pub sequencer_id: PeerId,
    pub latest_confirmed_block: Height,
    pub latest_confirmed_hash: String,
    pub round: Round,
    pub next_leader: PeerId,
    pub is_leader: bool,
    pub pending_transactions: usize,
    pub qc_buckets: usize,
    pub tc_buckets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: &str, gas: u64) -> Transaction {
        Transaction {
            sender_address: sender.to_string(),
            contract_address: "contract".to_string(),
            gas_limit: gas,
        }
    }

    #[test]
    fn test_block_wire_field_names() {
        let block = Block {
            height: 3,
            leader_signature: None,
            qc: vec![Signature { signer: 1, bytes: vec![7] }],
            tc: vec![],
            transactions: vec![tx("alice", 5)],
        };
        let value = serde_json::to_value(&block).unwrap();
        let obj = value.as_object().unwrap();
        for field in ["height", "leaderSignature", "qc", "tc", "transactions"] {
            assert!(obj.contains_key(field), "missing {}", field);
        }
        let tx_obj = obj["transactions"][0].as_object().unwrap();
        for field in ["senderAddress", "contractAddress", "gasLimit"] {
            assert!(tx_obj.contains_key(field), "missing {}", field);
        }
    }

    #[test]
    fn test_vote_wire_field_names() {
        let vote = SignedResponse {
            height: 1,
            prev_hash: "abc".to_string(),
            signature: Signature::default(),
        };
        let value = serde_json::to_value(&vote).unwrap();
        assert_eq!(value["prevHash"], "abc");
        assert!(value.get("signature").is_some());
    }

    #[test]
    fn test_timeout_round_defaults_to_zero() {
        let timeout: SignedTimeout = serde_json::from_str(
            r#"{"height": 2, "prevHash": "h", "signature": {"signer": 1, "bytes": []}}"#,
        )
        .unwrap();
        assert_eq!(timeout.round, 0);

        let value = serde_json::to_value(SignedTimeout { round: 3, ..timeout }).unwrap();
        assert_eq!(value["round"], 3);
    }

    #[test]
    fn test_hash_ignores_leader_signature() {
        let mut block = Block {
            height: 2,
            transactions: vec![tx("alice", 1)],
            ..Default::default()
        };
        let before = block.hash();
        block.leader_signature = Some(Signature { signer: 0, bytes: vec![1, 2, 3] });
        assert_eq!(before, block.hash());
    }

    #[test]
    fn test_hash_covers_contents() {
        let a = Block { height: 1, ..Default::default() };
        let b = Block { height: 2, ..Default::default() };
        assert_ne!(a.hash(), b.hash());
        assert_eq!(genesis_hash(), Block::genesis().hash());
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let block: Block = serde_json::from_str(r#"{"height": 4}"#).unwrap();
        assert_eq!(block.height, 4);
        assert!(block.qc.is_empty());
        assert!(block.transactions.is_empty());
    }
}
