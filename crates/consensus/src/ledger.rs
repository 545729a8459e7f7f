//! Ledger state owned by a sequencer
//!
//! Each resource sits behind its own lock and every accessor releases its lock
//! before returning; there is no cross-resource atomicity.

use crate::types::{genesis_hash, Height, Round, Signature, Transaction};
use parking_lot::RwLock;
use std::collections::HashMap;

/// The latest confirmed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tip {
    pub height: Height,
    pub hash: String,
    /// Rounds timed out at this height
    pub round: Round,
}

impl Tip {
    fn genesis() -> Self {
        Self {
            height: 0,
            hash: genesis_hash(),
            round: 0,
        }
    }
}

/// Which certificate a bucket feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    Quorum,
    Timeout,
}

/// Buckets are keyed by the attested hash and the round they were sent in
type BucketKey = (String, Round);

/// Signatures collected for one prev hash
#[derive(Debug, Default)]
struct Bucket {
    height: Height,
    votes: Vec<Signature>,
}

/// Balances, confirmed tip, certificate buckets and the last proposed height
#[derive(Debug)]
pub struct Ledger {
    carrier_balances: RwLock<HashMap<String, i64>>,
    tip: RwLock<Tip>,
    qc: RwLock<HashMap<BucketKey, Bucket>>,
    tc: RwLock<HashMap<BucketKey, Bucket>>,
    last_proposed: RwLock<Height>,
}

impl Ledger {
    /// Create a ledger at genesis with the given balances
    pub fn new(initial_balances: HashMap<String, i64>) -> Self {
        Self {
            carrier_balances: RwLock::new(initial_balances),
            tip: RwLock::new(Tip::genesis()),
            qc: RwLock::new(HashMap::new()),
            tc: RwLock::new(HashMap::new()),
            last_proposed: RwLock::new(0),
        }
    }

    /// Balance of a carrier (0 if never seen)
    pub fn balance(&self, address: &str) -> i64 {
        self.carrier_balances.read().get(address).copied().unwrap_or(0)
    }

    /// Copy of every tracked balance
    pub fn balances(&self) -> HashMap<String, i64> {
        self.carrier_balances.read().clone()
    }

    /// Debit each sender by its gas limit, in order
    pub fn apply_debits(&self, transactions: &[Transaction]) {
        let mut balances = self.carrier_balances.write();
        for tx in transactions {
            let balance = balances.entry(tx.sender_address.clone()).or_insert(0);
            *balance = balance.saturating_sub_unsigned(tx.gas_limit);
        }
    }

    pub fn tip(&self) -> Tip {
        self.tip.read().clone()
    }

    pub fn latest_confirmed_block(&self) -> Height {
        self.tip.read().height
    }

    /// Move the tip to `height` iff it is exactly one past the current tip
    pub fn try_advance(&self, height: Height, hash: String) -> bool {
        let mut tip = self.tip.write();
        if tip.height.checked_add(1) != Some(height) {
            return false;
        }
        *tip = Tip {
            height,
            hash,
            round: 0,
        };
        true
    }

    /// Move to the next round if the tip is still at `height`.
    /// Returns the tip as of the new round.
    pub fn advance_round(&self, height: Height) -> Option<Tip> {
        let mut tip = self.tip.write();
        if tip.height != height {
            return None;
        }
        tip.round = tip.round.saturating_add(1);
        Some(tip.clone())
    }

    /// Reserve `height` for a local proposal. False if this node already
    /// proposed at that height or above.
    pub fn claim_proposal(&self, height: Height) -> bool {
        let mut last = self.last_proposed.write();
        if height <= *last {
            return false;
        }
        *last = height;
        true
    }

    pub fn last_proposed(&self) -> Height {
        *self.last_proposed.read()
    }

    /// Append a signature to the bucket for `(prev_hash, round)`.
    ///
    /// Returns the bucket contents only on the append that first makes
    /// `is_valid` hold, so one hash yields at most one certificate.
    pub fn append_and_check(
        &self,
        kind: CertificateKind,
        prev_hash: &str,
        height: Height,
        round: Round,
        signature: Signature,
        is_valid: impl Fn(&[Signature]) -> bool,
    ) -> Option<Vec<Signature>> {
        let mut buckets = self.buckets(kind).write();
        let bucket = buckets
            .entry((prev_hash.to_string(), round))
            .or_insert_with(|| Bucket {
                height,
                votes: Vec::new(),
            });

        let was_valid = is_valid(&bucket.votes);
        bucket.votes.push(signature);

        if !was_valid && is_valid(&bucket.votes) {
            Some(bucket.votes.clone())
        } else {
            None
        }
    }

    /// Number of signatures held for `prev_hash` in `round`
    pub fn bucket_len(&self, kind: CertificateKind, prev_hash: &str, round: Round) -> usize {
        self.buckets(kind)
            .read()
            .get(&(prev_hash.to_string(), round))
            .map(|b| b.votes.len())
            .unwrap_or(0)
    }

    /// Number of live buckets
    pub fn bucket_count(&self, kind: CertificateKind) -> usize {
        self.buckets(kind).read().len()
    }

    /// Drop buckets attesting to heights below `height`. Returns how many went.
    pub fn evict_below(&self, height: Height) -> usize {
        let mut evicted = 0;
        for kind in [CertificateKind::Quorum, CertificateKind::Timeout] {
            let mut buckets = self.buckets(kind).write();
            let before = buckets.len();
            buckets.retain(|_, bucket| bucket.height >= height);
            evicted += before - buckets.len();
        }
        evicted
    }

    fn buckets(&self, kind: CertificateKind) -> &RwLock<HashMap<BucketKey, Bucket>> {
        match kind {
            CertificateKind::Quorum => &self.qc,
            CertificateKind::Timeout => &self.tc,
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(signer: u32) -> Signature {
        Signature { signer, bytes: vec![1] }
    }

    fn tx(sender: &str, gas: u64) -> Transaction {
        Transaction {
            sender_address: sender.to_string(),
            contract_address: "c".to_string(),
            gas_limit: gas,
        }
    }

    fn over_two(votes: &[Signature]) -> bool {
        votes.len() > 2
    }

    #[test]
    fn test_starts_at_genesis() {
        let ledger = Ledger::default();
        assert_eq!(ledger.latest_confirmed_block(), 0);
        assert_eq!(ledger.tip().hash, genesis_hash());
    }

    #[test]
    fn test_advance_only_by_one() {
        let ledger = Ledger::default();
        assert!(!ledger.try_advance(0, "x".into()));
        assert!(!ledger.try_advance(2, "x".into()));
        assert!(ledger.try_advance(1, "h1".into()));
        assert!(!ledger.try_advance(1, "h1".into()));
        assert_eq!(
            ledger.tip(),
            Tip {
                height: 1,
                hash: "h1".into(),
                round: 0
            }
        );
    }

    #[test]
    fn test_round_resets_on_advance() {
        let ledger = Ledger::default();
        assert_eq!(ledger.advance_round(0).map(|t| t.round), Some(1));
        assert_eq!(ledger.advance_round(0).map(|t| t.round), Some(2));
        assert!(ledger.advance_round(1).is_none());

        assert!(ledger.try_advance(1, "h1".into()));
        assert_eq!(ledger.tip().round, 0);
        // A round counted for the old height is not applied to the new one
        assert!(ledger.advance_round(0).is_none());
        assert_eq!(ledger.tip().round, 0);
    }

    #[test]
    fn test_one_proposal_per_height() {
        let ledger = Ledger::default();
        assert!(ledger.claim_proposal(1));
        assert!(!ledger.claim_proposal(1));
        assert!(ledger.claim_proposal(3));
        assert!(!ledger.claim_proposal(2));
        assert_eq!(ledger.last_proposed(), 3);
    }

    #[test]
    fn test_debits_in_order() {
        let ledger = Ledger::new(HashMap::from([
            ("alice".to_string(), 100),
            ("bob".to_string(), 50),
        ]));
        ledger.apply_debits(&[tx("alice", 10), tx("carol", 5), tx("alice", 1)]);
        assert_eq!(ledger.balance("alice"), 89);
        assert_eq!(ledger.balance("bob"), 50);
        assert_eq!(ledger.balance("carol"), -5);
    }

    #[test]
    fn test_bucket_fires_once() {
        let ledger = Ledger::default();
        let k = CertificateKind::Quorum;
        assert!(ledger.append_and_check(k, "h", 1, 0, sig(0), over_two).is_none());
        assert!(ledger.append_and_check(k, "h", 1, 0, sig(1), over_two).is_none());
        let cert = ledger.append_and_check(k, "h", 1, 0, sig(2), over_two).unwrap();
        assert_eq!(cert.len(), 3);
        assert!(ledger.append_and_check(k, "h", 1, 0, sig(3), over_two).is_none());
        assert_eq!(ledger.bucket_len(k, "h", 0), 4);
    }

    #[test]
    fn test_buckets_do_not_merge() {
        let ledger = Ledger::default();
        let k = CertificateKind::Quorum;
        ledger.append_and_check(k, "a", 1, 0, sig(0), over_two);
        ledger.append_and_check(k, "a", 1, 0, sig(1), over_two);
        assert!(ledger.append_and_check(k, "b", 1, 0, sig(2), over_two).is_none());
        assert!(ledger.append_and_check(CertificateKind::Timeout, "a", 1, 0, sig(2), over_two).is_none());
        assert_eq!(ledger.bucket_len(k, "a", 0), 2);
        assert_eq!(ledger.bucket_len(k, "b", 0), 1);
        assert_eq!(ledger.bucket_len(CertificateKind::Timeout, "a", 0), 1);
    }

    #[test]
    fn test_rounds_do_not_merge() {
        let ledger = Ledger::default();
        let k = CertificateKind::Timeout;
        ledger.append_and_check(k, "h", 0, 1, sig(0), over_two);
        ledger.append_and_check(k, "h", 0, 1, sig(1), over_two);
        assert!(ledger.append_and_check(k, "h", 0, 2, sig(2), over_two).is_none());
        assert!(ledger.append_and_check(k, "h", 0, 1, sig(2), over_two).is_some());
        assert_eq!(ledger.bucket_count(k), 2);
    }

    #[test]
    fn test_evict_below() {
        let ledger = Ledger::default();
        ledger.append_and_check(CertificateKind::Quorum, "old", 1, 0, sig(0), over_two);
        ledger.append_and_check(CertificateKind::Timeout, "old-t", 1, 1, sig(0), over_two);
        ledger.append_and_check(CertificateKind::Quorum, "new", 2, 0, sig(0), over_two);

        assert_eq!(ledger.evict_below(2), 2);
        assert_eq!(ledger.bucket_count(CertificateKind::Quorum), 1);
        assert_eq!(ledger.bucket_count(CertificateKind::Timeout), 0);
        assert_eq!(ledger.bucket_len(CertificateKind::Quorum, "new", 0), 1);
    }
}
