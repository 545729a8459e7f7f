//! Pending transactions waiting to be included in a proposal

use crate::error::ConsensusError;
use crate::types::Transaction;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

/// Bounded FIFO of submitted transactions
pub struct Mempool {
    sender: Sender<Transaction>,
    receiver: Receiver<Transaction>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Queue a transaction
    pub fn submit(&self, tx: Transaction) -> Result<(), ConsensusError> {
        self.sender.try_send(tx).map_err(|e| match e {
            TrySendError::Full(_) | TrySendError::Disconnected(_) => ConsensusError::MempoolFull,
        })
    }

    /// Take up to `max` transactions in submission order
    pub fn drain(&self, max: usize) -> Vec<Transaction> {
        let mut txs = Vec::with_capacity(max.min(self.len()));
        while txs.len() < max {
            match self.receiver.try_recv() {
                Ok(tx) => txs.push(tx),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        txs
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> Transaction {
        Transaction {
            sender_address: format!("sender-{}", n),
            contract_address: "c".to_string(),
            gas_limit: n,
        }
    }

    #[test]
    fn test_drain_preserves_order_and_limit() {
        let pool = Mempool::new(10);
        for n in 0..5 {
            pool.submit(tx(n)).unwrap();
        }
        let first = pool.drain(3);
        assert_eq!(first.iter().map(|t| t.gas_limit).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.drain(10).len(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_full_pool_rejects() {
        let pool = Mempool::new(1);
        pool.submit(tx(1)).unwrap();
        assert!(matches!(pool.submit(tx(2)), Err(ConsensusError::MempoolFull)));
    }
}
