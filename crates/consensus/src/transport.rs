//! Peer transport - fire-and-forget remote calls to other sequencers
//!
//! Every send is spawned as its own task with an independent retry loop, so
//! callers never wait on the network and one slow peer never holds up another.

use crate::error::TransportError;
use crate::types::{Block, PeerId, SignedResponse, SignedTimeout};
use async_trait::async_trait;
use dashmap::DashMap;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Remote method receiving block proposals
pub const PROCESS_BLOCK: &str = "Sequencer.ProcessBlock";
/// Remote method receiving votes
pub const PROCESS_RESPONSE: &str = "Sequencer.ProcessResponse";
/// Remote method receiving timeouts
pub const PROCESS_TIMEOUT: &str = "Sequencer.ProcessTimeout";

/// Outbound side of the protocol. Every method returns immediately.
pub trait PeerTransport: Send + Sync {
    /// Send a proposal to every configured sequencer
    fn propose_block(&self, block: Block);

    /// Send a vote to the leader collecting it
    fn send_response(&self, response: SignedResponse, leader: PeerId);

    /// Send a timeout to the leader collecting it
    fn send_timeout(&self, timeout: SignedTimeout, leader: PeerId);
}

/// How hard to try a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// An established channel to one peer
#[async_trait]
pub trait Connection: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<bool, TransportError>;
}

/// Opens connections to peer addresses
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self, addr: &str) -> Result<Self::Conn, TransportError>;
}

/// JSON-RPC over HTTP
#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

pub struct HttpConnection {
    client: HttpClient,
}

#[async_trait]
impl Connector for HttpConnector {
    type Conn = HttpConnection;

    async fn connect(&self, addr: &str) -> Result<HttpConnection, TransportError> {
        let url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };
        let client = HttpClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(&url)
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(HttpConnection { client })
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn call(&self, method: &str, params: Value) -> Result<bool, TransportError> {
        let call_error = |reason: String| TransportError::Call {
            method: method.to_string(),
            reason,
        };
        let mut array = ArrayParams::new();
        array.insert(params).map_err(|e| call_error(e.to_string()))?;
        self.client
            .request::<bool, _>(method, array)
            .await
            .map_err(|e| call_error(e.to_string()))
    }
}

/// Peer transport backed by a [`Connector`], caching one connection per peer
pub struct RpcPeerTransport<C: Connector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connector> {
    addresses: Vec<String>,
    connector: C,
    connections: DashMap<PeerId, Arc<C::Conn>>,
    policy: RetryPolicy,
}

impl RpcPeerTransport<HttpConnector> {
    /// HTTP transport with the default retry policy
    pub fn http(addresses: Vec<String>) -> Self {
        Self::new(addresses, HttpConnector::default(), RetryPolicy::default())
    }
}

impl<C: Connector> RpcPeerTransport<C> {
    pub fn new(addresses: Vec<String>, connector: C, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                addresses,
                connector,
                connections: DashMap::new(),
                policy,
            }),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.addresses.len()
    }

    /// Number of cached connections
    pub fn cached_connections(&self) -> usize {
        self.inner.connections.len()
    }

    /// Spawn a delivery of `message` to `peer`. The handle resolves to whether
    /// the call eventually went through; nothing in the protocol awaits it.
    pub fn dispatch<M: Serialize>(
        &self,
        peer: PeerId,
        method: &'static str,
        message: &M,
    ) -> Option<JoinHandle<bool>> {
        let params = match serde_json::to_value(message) {
            Ok(params) => params,
            Err(e) => {
                tracing::error!("Failed to encode {} for sequencer {}: {}", method, peer, e);
                return None;
            }
        };
        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            inner.deliver(peer, method, params).await
        }))
    }
}

impl<C: Connector> Inner<C> {
    async fn deliver(&self, peer: PeerId, method: &'static str, params: Value) -> bool {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            match self.attempt(peer, method, params.clone()).await {
                Ok(_) => {
                    tracing::debug!("Delivered {} to sequencer {}", method, peer);
                    return true;
                }
                Err(e) => {
                    self.connections.remove(&peer);
                    tracing::warn!(
                        "Attempt {}/{} of {} to sequencer {} failed: {}",
                        attempt,
                        attempts,
                        method,
                        peer,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }
        tracing::error!(
            "Giving up on {} to sequencer {} after {} attempts",
            method,
            peer,
            attempts
        );
        false
    }

    async fn attempt(
        &self,
        peer: PeerId,
        method: &str,
        params: Value,
    ) -> Result<bool, TransportError> {
        let conn = self.connection(peer).await?;
        conn.call(method, params).await
    }

    async fn connection(&self, peer: PeerId) -> Result<Arc<C::Conn>, TransportError> {
        if let Some(conn) = self.connections.get(&peer).map(|c| c.value().clone()) {
            return Ok(conn);
        }
        let addr = self
            .addresses
            .get(peer as usize)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let conn = Arc::new(self.connector.connect(addr).await?);
        self.connections.insert(peer, conn.clone());
        Ok(conn)
    }
}

impl<C: Connector> PeerTransport for RpcPeerTransport<C> {
    fn propose_block(&self, block: Block) {
        tracing::info!(
            "Proposing block {} to {} sequencers",
            block.height,
            self.peer_count()
        );
        for peer in 0..self.peer_count() as PeerId {
            self.dispatch(peer, PROCESS_BLOCK, &block);
        }
    }

    fn send_response(&self, response: SignedResponse, leader: PeerId) {
        self.dispatch(leader, PROCESS_RESPONSE, &response);
    }

    fn send_timeout(&self, timeout: SignedTimeout, leader: PeerId) {
        self.dispatch(leader, PROCESS_TIMEOUT, &timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(10),
        }
    }

    fn addrs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("peer-{}", i)).collect()
    }

    /// Fails the first `fail_calls` calls and the first `fail_connects` connects
    #[derive(Default)]
    struct Flaky {
        fail_calls: usize,
        fail_connects: usize,
        calls: Arc<AtomicUsize>,
        connects: AtomicUsize,
        delivered: Arc<Mutex<Vec<(String, String)>>>,
        connect_delay: Duration,
    }

    struct FlakyConn {
        addr: String,
        fail_calls: usize,
        calls: Arc<AtomicUsize>,
        delivered: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Connection for FlakyConn {
        async fn call(&self, method: &str, _params: Value) -> Result<bool, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_calls {
                return Err(TransportError::Call {
                    method: method.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            self.delivered.lock().push((self.addr.clone(), method.to_string()));
            Ok(true)
        }
    }

    #[async_trait]
    impl Connector for Flaky {
        type Conn = FlakyConn;

        async fn connect(&self, addr: &str) -> Result<FlakyConn, TransportError> {
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_connects {
                return Err(TransportError::Connect {
                    addr: addr.to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(FlakyConn {
                addr: addr.to_string(),
                fail_calls: self.fail_calls,
                calls: self.calls.clone(),
                delivered: self.delivered.clone(),
            })
        }
    }

    fn vote() -> SignedResponse {
        SignedResponse {
            height: 1,
            prev_hash: "h".to_string(),
            signature: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_fifth_attempt() {
        let connector = Flaky {
            fail_calls: 4,
            ..Default::default()
        };
        let calls = connector.calls.clone();
        let transport = RpcPeerTransport::new(addrs(2), connector, fast_policy());

        let handle = transport.dispatch(1, PROCESS_RESPONSE, &vote()).unwrap();
        assert!(handle.await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_abandons_after_five_failures() {
        let connector = Flaky {
            fail_calls: usize::MAX,
            ..Default::default()
        };
        let calls = connector.calls.clone();
        let transport = RpcPeerTransport::new(addrs(2), connector, fast_policy());

        let handle = transport.dispatch(0, PROCESS_TIMEOUT, &vote()).unwrap();
        assert!(!handle.await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_failed_attempt_drops_cached_connection() {
        let connector = Flaky {
            fail_connects: 2,
            ..Default::default()
        };
        let transport = RpcPeerTransport::new(addrs(1), connector, fast_policy());

        let handle = transport.dispatch(0, PROCESS_RESPONSE, &vote()).unwrap();
        assert!(handle.await.unwrap());
        assert_eq!(transport.inner.connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(transport.cached_connections(), 1);
    }

    #[tokio::test]
    async fn test_reuses_cached_connection() {
        let transport = RpcPeerTransport::new(addrs(1), Flaky::default(), fast_policy());
        for _ in 0..3 {
            let handle = transport.dispatch(0, PROCESS_RESPONSE, &vote()).unwrap();
            assert!(handle.await.unwrap());
        }
        assert_eq!(transport.inner.connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_peer_is_abandoned() {
        let transport = RpcPeerTransport::new(addrs(1), Flaky::default(), fast_policy());
        let handle = transport.dispatch(7, PROCESS_RESPONSE, &vote()).unwrap();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_send_does_not_block_caller() {
        let connector = Flaky {
            connect_delay: Duration::from_millis(500),
            ..Default::default()
        };
        let transport = RpcPeerTransport::new(addrs(4), connector, fast_policy());

        let start = Instant::now();
        transport.propose_block(Block::default());
        transport.send_response(vote(), 2);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_propose_reaches_every_peer() {
        let connector = Flaky::default();
        let delivered = connector.delivered.clone();
        let transport = RpcPeerTransport::new(addrs(4), connector, fast_policy());

        transport.propose_block(Block {
            height: 1,
            ..Default::default()
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while delivered.lock().len() < 4 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut peers: Vec<String> = delivered.lock().iter().map(|(a, _)| a.clone()).collect();
        peers.sort();
        assert_eq!(peers, addrs(4));
        assert!(delivered.lock().iter().all(|(_, m)| m == PROCESS_BLOCK));
    }
}
