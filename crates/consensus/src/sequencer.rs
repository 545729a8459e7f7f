//! Sequencer core - ingests proposals, votes and timeouts and drives the protocol
//!
//! Flow for one height:
//! - Leader of height h broadcasts a block carrying a certificate for h-1
//! - Every sequencer that accepts it votes for its hash to the leader of h+1
//! - That leader forms a QC once more than 2/3 of peers voted and proposes h+1
//! - If nothing is confirmed for a round, sequencers bump their round and send
//!   timeouts to the next peer in the schedule, which proposes on a TC

use crate::certificate::CertificateValidator;
use crate::error::ConsensusError;
use crate::ledger::{CertificateKind, Ledger};
use crate::mempool::Mempool;
use crate::schedule::LeaderSchedule;
use crate::signer::SignatureScheme;
use crate::transport::PeerTransport;
use crate::types::{
    Block, Height, PeerId, Round, SequencerConfig, SequencerStatus, Signature, SignedResponse,
    SignedTimeout, Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// One BFT sequencer
pub struct Sequencer {
    id: PeerId,
    config: SequencerConfig,
    /// Minimum delay between forming a certificate and broadcasting the block built on it
    block_time: Duration,
    ledger: Ledger,
    mempool: Mempool,
    validator: CertificateValidator,
    schedule: Arc<dyn LeaderSchedule>,
    scheme: Arc<dyn SignatureScheme>,
    transport: Arc<dyn PeerTransport>,
}

impl Sequencer {
    pub fn new(
        config: SequencerConfig,
        schedule: Arc<dyn LeaderSchedule>,
        scheme: Arc<dyn SignatureScheme>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, ConsensusError> {
        let peers = config.peer_count();
        if peers == 0 {
            return Err(ConsensusError::NoPeers);
        }
        if config.sequencer_id as usize >= peers {
            return Err(ConsensusError::UnknownSequencer {
                id: config.sequencer_id,
                peers,
            });
        }
        if scheme.key_count() != peers {
            return Err(ConsensusError::KeyCountMismatch {
                expected: peers,
                actual: scheme.key_count(),
            });
        }

        Ok(Self {
            id: config.sequencer_id,
            block_time: Duration::ZERO,
            ledger: Ledger::new(config.initial_balances.clone()),
            mempool: Mempool::new(config.mempool_capacity),
            validator: CertificateValidator::new(peers, scheme.clone()),
            schedule,
            scheme,
            transport,
            config,
        })
    }

    /// Pace proposals: the leader waits this long before broadcasting a block
    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn validator(&self) -> &CertificateValidator {
        &self.validator
    }

    /// Collector for the confirmed tip in the current round. In round 0 this is
    /// the proposer of the next block.
    pub fn next_leader(&self) -> PeerId {
        let tip = self.ledger.tip();
        self.collector(tip.height, tip.round)
    }

    pub fn is_self_leader(&self) -> bool {
        self.next_leader() == self.id
    }

    /// Peer that collects votes (round 0) or timeouts (later rounds) for
    /// `height` and proposes `height + 1`
    fn collector(&self, height: Height, round: Round) -> PeerId {
        self.schedule
            .leader_for(height.saturating_add(1).saturating_add(round))
    }

    /// Handle a proposal. Returns whether it was accepted.
    pub fn process_block(&self, block: &Block) -> bool {
        let latest = self.ledger.latest_confirmed_block();
        if latest.checked_add(1) != Some(block.height) {
            tracing::debug!(
                "Dropping block {}: expected height {}",
                block.height,
                latest.saturating_add(1)
            );
            return false;
        }

        if !self.validator.validate_certificate(&block.qc)
            && !self.validator.validate_certificate(&block.tc)
        {
            tracing::debug!(
                "Dropping block {}: certificate too small (qc {}, tc {}, need > {})",
                block.height,
                block.qc.len(),
                block.tc.len(),
                self.validator.quorum_threshold()
            );
            return false;
        }

        let hash = block.hash();
        if !self.ledger.try_advance(block.height, hash.clone()) {
            // A concurrent delivery of the same height won
            return false;
        }

        // Separate critical section from the height advance
        self.ledger.apply_debits(&block.transactions);

        let evicted = self.ledger.evict_below(block.height);
        tracing::info!(
            "Confirmed block {} ({} txs, {} gas), evicted {} stale buckets",
            block.height,
            block.transactions.len(),
            block.total_gas(),
            evicted
        );

        let leader = self.collector(block.height, 0);
        let response = SignedResponse {
            height: block.height,
            signature: self.scheme.sign(&hash),
            prev_hash: hash,
        };
        self.transport.send_response(response, leader);
        true
    }

    /// Handle a vote. Returns whether it was added to a QC bucket.
    pub fn process_response(&self, response: &SignedResponse) -> bool {
        self.collect(
            CertificateKind::Quorum,
            response.height,
            0,
            &response.prev_hash,
            &response.signature,
        )
    }

    /// Handle a timeout. Returns whether it was added to a TC bucket.
    pub fn process_timeout(&self, timeout: &SignedTimeout) -> bool {
        self.collect(
            CertificateKind::Timeout,
            timeout.height,
            timeout.round,
            &timeout.prev_hash,
            &timeout.signature,
        )
    }

    fn collect(
        &self,
        kind: CertificateKind,
        height: Height,
        round: Round,
        prev_hash: &str,
        signature: &Signature,
    ) -> bool {
        if !self.validator.validate_signature(prev_hash, signature) {
            tracing::debug!(
                "Dropping {:?} vote from {}: bad signature",
                kind,
                signature.signer
            );
            return false;
        }
        if self.collector(height, round) != self.id {
            return false;
        }
        if height < self.ledger.latest_confirmed_block() {
            tracing::debug!("Dropping {:?} vote for stale height {}", kind, height);
            return false;
        }

        let certificate = self.ledger.append_and_check(
            kind,
            prev_hash,
            height,
            round,
            signature.clone(),
            |votes| self.validator.validate_certificate(votes),
        );

        if let Some(certificate) = certificate {
            tracing::info!(
                "Formed {:?} certificate for height {} round {} with {} signatures",
                kind,
                height,
                round,
                certificate.len()
            );
            self.propose(height.saturating_add(1), kind, certificate);
        }
        true
    }

    /// Build a block on top of a fresh certificate and broadcast it
    fn propose(&self, height: Height, kind: CertificateKind, certificate: Vec<Signature>) {
        if !self.ledger.claim_proposal(height) {
            tracing::debug!(
                "Already proposed at height {}, discarding {:?} certificate",
                height,
                kind
            );
            return;
        }

        let (qc, tc) = match kind {
            CertificateKind::Quorum => (certificate, Vec::new()),
            CertificateKind::Timeout => (Vec::new(), certificate),
        };
        let mut block = Block {
            height,
            leader_signature: None,
            qc,
            tc,
            transactions: self.mempool.drain(self.config.max_txs_per_block),
        };
        block.leader_signature = Some(self.scheme.sign(&block.hash()));

        if self.block_time.is_zero() {
            self.transport.propose_block(block);
            return;
        }

        let transport = self.transport.clone();
        let delay = self.block_time;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            transport.propose_block(block);
        });
    }

    /// Give up on the current round: move to the next one and send a timeout
    /// for the confirmed tip to that round's collector
    pub fn on_round_timeout(&self) {
        self.time_out(self.ledger.latest_confirmed_block());
    }

    fn time_out(&self, height: Height) {
        // The height moved since the caller looked
        let Some(tip) = self.ledger.advance_round(height) else {
            return;
        };
        let leader = self.collector(tip.height, tip.round);
        tracing::warn!(
            "Round {} timed out at height {}; sending timeout to sequencer {}",
            tip.round,
            tip.height,
            leader
        );
        let timeout = SignedTimeout {
            height: tip.height,
            round: tip.round,
            signature: self.scheme.sign(&tip.hash),
            prev_hash: tip.hash,
        };
        self.transport.send_timeout(timeout, leader);
    }

    /// Fire [`Self::on_round_timeout`] whenever a full round passes without
    /// the confirmed height moving. Runs until the task is dropped.
    pub async fn run_round_timer(&self) {
        let mut ticker = tokio::time::interval(self.config.round_timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut last_seen = self.ledger.latest_confirmed_block();
        loop {
            ticker.tick().await;
            let current = self.ledger.latest_confirmed_block();
            if current == last_seen {
                self.time_out(current);
            }
            last_seen = current;
        }
    }

    /// Queue a transaction for the next block this node proposes
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), ConsensusError> {
        self.mempool.submit(tx)
    }

    pub fn balance(&self, address: &str) -> i64 {
        self.ledger.balance(address)
    }

    pub fn status(&self) -> SequencerStatus {
        let tip = self.ledger.tip();
        let next_leader = self.collector(tip.height, tip.round);
        SequencerStatus {
            sequencer_id: self.id,
            latest_confirmed_block: tip.height,
            latest_confirmed_hash: tip.hash,
            round: tip.round,
            next_leader,
            is_leader: next_leader == self.id,
            pending_transactions: self.mempool.len(),
            qc_buckets: self.ledger.bucket_count(CertificateKind::Quorum),
            tc_buckets: self.ledger.bucket_count(CertificateKind::Timeout),
        }
    }
}
