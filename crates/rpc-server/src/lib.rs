//! RPC Server - JSON-RPC over HTTP for sequencers
//!
//! Exposes the peer protocol and a small client surface:
//! - Sequencer.ProcessBlock, Sequencer.ProcessResponse, Sequencer.ProcessTimeout
//! - Sequencer.SubmitTransaction, Sequencer.GetStatus, Sequencer.GetBalance, getHealth

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};
