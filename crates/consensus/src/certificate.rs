//! Certificate validation - supermajority threshold and vote authenticity

use crate::signer::SignatureScheme;
use crate::types::Signature;
use std::sync::Arc;

/// Checks QCs/TCs and individual votes against a fixed peer set
#[derive(Clone)]
pub struct CertificateValidator {
    peer_count: usize,
    scheme: Arc<dyn SignatureScheme>,
}

impl CertificateValidator {
    pub fn new(peer_count: usize, scheme: Arc<dyn SignatureScheme>) -> Self {
        Self { peer_count, scheme }
    }

    /// Largest vote count that is still NOT a supermajority: floor(2N/3)
    pub fn quorum_threshold(&self) -> usize {
        self.peer_count * 2 / 3
    }

    /// True iff there are more than floor(2N/3) votes. Shared by QCs and TCs.
    pub fn validate_certificate(&self, votes: &[Signature]) -> bool {
        votes.len() > self.quorum_threshold()
    }

    /// True iff `signature` authenticates `prev_hash` for its claimed signer
    pub fn validate_signature(&self, prev_hash: &str, signature: &Signature) -> bool {
        self.scheme.verify(prev_hash, signature)
    }
}
