//! Error types for the sequencer

use crate::types::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("No peers configured")]
    NoPeers,
    #[error("Sequencer id {id} is outside the peer list of {peers} addresses")]
    UnknownSequencer { id: PeerId, peers: usize },
    #[error("Expected {expected} public keys, got {actual}")]
    KeyCountMismatch { expected: usize, actual: usize },
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Mempool full")]
    MempoolFull,
}

/// Failure of a single delivery attempt. Never surfaced past the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No address configured for peer {0}")]
    UnknownPeer(PeerId),
    #[error("Connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("Call {method} failed: {reason}")]
    Call { method: String, reason: String },
}
