//! Sequencer Consensus - leader-based BFT block sequencing
//!
//! Architecture:
//! - A deterministic schedule names the leader of every height
//! - The leader broadcasts a block carrying a certificate for the previous height
//! - Peers accept it, debit gas from carrier balances and vote to the next leader
//! - More than 2/3 of votes (QC) or timeouts (TC) let that leader propose again

pub mod certificate;
pub mod error;
pub mod ledger;
pub mod mempool;
pub mod schedule;
pub mod sequencer;
pub mod signer;
pub mod transport;
pub mod types;

pub use certificate::CertificateValidator;
pub use error::{ConsensusError, TransportError};
pub use ledger::{CertificateKind, Ledger, Tip};
pub use mempool::Mempool;
pub use schedule::{FixedSchedule, LeaderSchedule, StakeWeightedSchedule};
pub use sequencer::Sequencer;
pub use signer::{generate_keypair, Ed25519Scheme, SignatureScheme};
pub use transport::{
    Connection, Connector, HttpConnector, PeerTransport, RetryPolicy, RpcPeerTransport,
    PROCESS_BLOCK, PROCESS_RESPONSE, PROCESS_TIMEOUT,
};
pub use types::*;
