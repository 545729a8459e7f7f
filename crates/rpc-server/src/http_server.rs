//! HTTP JSON-RPC Server
//!
//! Provides the HTTP endpoint peers call to deliver proposals, votes and timeouts.

use crate::methods::{
    handle_get_balance, handle_get_health, handle_get_status, handle_process_block,
    handle_process_response, handle_process_timeout, handle_submit_transaction, single_param,
    RpcContext, RpcError, GET_BALANCE, GET_STATUS, SUBMIT_TRANSACTION,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use sequencer_consensus::{PROCESS_BLOCK, PROCESS_RESPONSE, PROCESS_TIMEOUT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// HTTP RPC Server
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    /// Create a new HTTP RPC server
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Serve on an already bound listener until the task is dropped
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Handle JSON-RPC request
async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let result = dispatch_method(&context, &request.method, request.params);

    let response = match result {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError {
                code: error_code(&e),
                message: e.to_string(),
            }),
        },
    };

    (StatusCode::OK, Json(response))
}

/// Dispatch to appropriate method handler
fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::trace!("RPC method called: {}", method);
    match method {
        PROCESS_BLOCK => {
            let ack = handle_process_block(ctx, single_param(params)?)?;
            Ok(json!(ack))
        }

        PROCESS_RESPONSE => {
            let ack = handle_process_response(ctx, single_param(params)?)?;
            Ok(json!(ack))
        }

        PROCESS_TIMEOUT => {
            let ack = handle_process_timeout(ctx, single_param(params)?)?;
            Ok(json!(ack))
        }

        SUBMIT_TRANSACTION => {
            let queued = handle_submit_transaction(ctx, single_param(params)?)?;
            Ok(json!(queued))
        }

        GET_STATUS => {
            let status = handle_get_status(ctx)?;
            serde_json::to_value(status).map_err(|e| RpcError::InternalError(e.to_string()))
        }

        GET_BALANCE => {
            let address: String = single_param(params)?;
            let balance = handle_get_balance(ctx, address)?;
            Ok(json!(balance))
        }

        "getHealth" => {
            let health = handle_get_health()?;
            Ok(json!(health))
        }

        "getVersion" => Ok(json!({
            "sequencer": env!("CARGO_PKG_VERSION"),
        })),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

/// Map error to JSON-RPC error code
fn error_code(error: &RpcError) -> i32 {
    match error {
        RpcError::InvalidParams(_) => -32602,
        RpcError::MethodNotFound(_) => -32601,
        RpcError::InternalError(_) => -32603,
    }
}
