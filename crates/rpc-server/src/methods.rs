//! RPC Methods - JSON-RPC method handlers
//!
//! The protocol methods always acknowledge with `true`: a proposal, vote or
//! timeout that the sequencer rejects is dropped silently.

use sequencer_consensus::{
    Block, Sequencer, SequencerStatus, SignedResponse, SignedTimeout, Transaction,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Submit a transaction to the local mempool
pub const SUBMIT_TRANSACTION: &str = "Sequencer.SubmitTransaction";
/// Snapshot of the local sequencer
pub const GET_STATUS: &str = "Sequencer.GetStatus";
/// Carrier balance lookup
pub const GET_BALANCE: &str = "Sequencer.GetBalance";

/// RPC context shared across handlers
pub struct RpcContext {
    pub sequencer: Arc<Sequencer>,
}

impl RpcContext {
    pub fn new(sequencer: Arc<Sequencer>) -> Self {
        Self { sequencer }
    }
}

// ============ Params ============

/// Extract the single argument of a call. Accepts `[arg]` or a bare object.
pub fn single_param<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let arg = match params {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(RpcError::InvalidParams("Missing argument".to_string()));
            }
            items.swap_remove(0)
        }
        Value::Object(_) => params,
        _ => return Err(RpcError::InvalidParams("Expected an array or object".to_string())),
    };
    serde_json::from_value(arg).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

// ============ RPC Handlers ============

/// Handle Sequencer.ProcessBlock
pub fn handle_process_block(ctx: &RpcContext, block: Block) -> Result<bool, RpcError> {
    ctx.sequencer.process_block(&block);
    Ok(true)
}

/// Handle Sequencer.ProcessResponse
pub fn handle_process_response(
    ctx: &RpcContext,
    response: SignedResponse,
) -> Result<bool, RpcError> {
    ctx.sequencer.process_response(&response);
    Ok(true)
}

/// Handle Sequencer.ProcessTimeout
pub fn handle_process_timeout(ctx: &RpcContext, timeout: SignedTimeout) -> Result<bool, RpcError> {
    ctx.sequencer.process_timeout(&timeout);
    Ok(true)
}

/// Handle Sequencer.SubmitTransaction. `false` means the mempool is full.
pub fn handle_submit_transaction(ctx: &RpcContext, tx: Transaction) -> Result<bool, RpcError> {
    match ctx.sequencer.submit_transaction(tx) {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::warn!("Transaction not queued: {}", e);
            Ok(false)
        }
    }
}

/// Handle Sequencer.GetStatus
pub fn handle_get_status(ctx: &RpcContext) -> Result<SequencerStatus, RpcError> {
    Ok(ctx.sequencer.status())
}

/// Handle Sequencer.GetBalance
pub fn handle_get_balance(ctx: &RpcContext, address: String) -> Result<i64, RpcError> {
    Ok(ctx.sequencer.balance(&address))
}

/// Handle getHealth
pub fn handle_get_health() -> Result<String, RpcError> {
    Ok("ok".to_string())
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
}
