//! Signing and verification capability for votes, timeouts and proposals

use crate::error::ConsensusError;
use crate::types::{PeerId, Signature};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

/// Produces and checks attestations over a block hash
pub trait SignatureScheme: Send + Sync {
    /// Sign `hash` as the local sequencer
    fn sign(&self, hash: &str) -> Signature;

    /// Check that `signature` is a genuine attestation to `hash` by its claimed signer
    fn verify(&self, hash: &str, signature: &Signature) -> bool;

    /// Number of peers this scheme can verify
    fn key_count(&self) -> usize;
}

/// Ed25519 over a static table of peer public keys
pub struct Ed25519Scheme {
    id: PeerId,
    signing_key: SigningKey,
    /// Indexed by peer id
    peer_keys: Vec<VerifyingKey>,
}

impl Ed25519Scheme {
    pub fn new(id: PeerId, signing_key: SigningKey, peer_keys: Vec<VerifyingKey>) -> Self {
        Self {
            id,
            signing_key,
            peer_keys,
        }
    }

    /// Build from bs58-encoded key material
    pub fn from_encoded(
        id: PeerId,
        secret_key: &str,
        public_keys: &[String],
    ) -> Result<Self, ConsensusError> {
        let secret = decode_key(secret_key)?;
        let peer_keys = public_keys
            .iter()
            .map(|encoded| {
                let bytes = decode_key(encoded)?;
                VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| ConsensusError::InvalidKey(format!("{}: {}", encoded, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(id, SigningKey::from_bytes(&secret), peer_keys))
    }

    /// Public key of the local sequencer
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl SignatureScheme for Ed25519Scheme {
    fn sign(&self, hash: &str) -> Signature {
        Signature {
            signer: self.id,
            bytes: self.signing_key.sign(hash.as_bytes()).to_bytes().to_vec(),
        }
    }

    fn verify(&self, hash: &str, signature: &Signature) -> bool {
        let Some(key) = self.peer_keys.get(signature.signer as usize) else {
            return false;
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(&signature.bytes) else {
            return false;
        };
        key.verify(hash.as_bytes(), &sig).is_ok()
    }

    fn key_count(&self) -> usize {
        self.peer_keys.len()
    }
}

/// Generate a fresh keypair, returned as bs58 (secret, public)
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    (
        bs58::encode(signing_key.to_bytes()).into_string(),
        bs58::encode(signing_key.verifying_key().to_bytes()).into_string(),
    )
}

fn decode_key(encoded: &str) -> Result<[u8; 32], ConsensusError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| ConsensusError::InvalidKey(format!("{}: {}", encoded, e)))?;
    bytes
        .try_into()
        .map_err(|_| ConsensusError::InvalidKey(format!("{}: expected 32 bytes", encoded)))
}
