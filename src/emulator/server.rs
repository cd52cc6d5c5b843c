//! JSON-RPC 2.0 over HTTP in front of a [`Ledger`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::Address;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Json, State};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::chain::rpc::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, codes};
use crate::chain::types::{TxParams, format_bytes, format_quantity, parse_bytes, parse_hash};

use super::ledger::{DEFAULT_BALANCE, DEFAULT_CHAIN_ID, GAS_PRICE, Ledger};

pub type SharedLedger = Arc<Mutex<Ledger>>;

/// Emulator settings.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub chain_id: u64,
    /// Starting balance of every account, in wei.
    pub initial_balance: u128,
    /// Never return receipts.
    pub withhold_receipts: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8545,
            chain_id: DEFAULT_CHAIN_ID,
            initial_balance: DEFAULT_BALANCE,
            withhold_receipts: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("invalid listen address {0}")]
    InvalidAddress(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// A running emulator.
pub struct EmulatorHandle {
    addr: SocketAddr,
    ledger: SharedLedger,
    shutdown: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl EmulatorHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for JSON-RPC requests.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Requests seen for `method` so far.
    pub fn method_count(&self, method: &str) -> u64 {
        lock(&self.ledger).method_count(method)
    }

    pub fn set_withhold_receipts(&self, withhold: bool) {
        lock(&self.ledger).set_withhold_receipts(withhold);
    }

    /// Stop accepting requests and wait for the server task to end.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

/// Bind and serve in a background task.
pub async fn spawn(config: EmulatorConfig) -> Result<EmulatorHandle, EmulatorError> {
    let (listener, ledger) = bind(&config).await?;
    let addr = listener.local_addr()?;
    let app = router(ledger.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    info!(%addr, chain_id = config.chain_id, "RPC emulator listening");
    Ok(EmulatorHandle {
        addr,
        ledger,
        shutdown: Some(shutdown_tx),
        join,
    })
}

/// Bind and serve in the current task until `shutdown` resolves.
pub async fn serve<F>(config: EmulatorConfig, shutdown: F) -> Result<(), EmulatorError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (listener, ledger) = bind(&config).await?;
    info!(
        addr = %listener.local_addr()?,
        chain_id = config.chain_id,
        "RPC emulator listening"
    );
    axum::serve(listener, router(ledger))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("RPC emulator stopped");
    Ok(())
}

async fn bind(config: &EmulatorConfig) -> Result<(TcpListener, SharedLedger), EmulatorError> {
    let host = config
        .host
        .parse::<std::net::IpAddr>()
        .map_err(|_| EmulatorError::InvalidAddress(config.host.clone()))?;
    let listener = TcpListener::bind((host, config.port))
        .await
        .map_err(|source| EmulatorError::Bind {
            addr: format!("{}:{}", config.host, config.port),
            source,
        })?;

    let mut ledger = Ledger::new(config.chain_id, config.initial_balance);
    ledger.set_withhold_receipts(config.withhold_receipts);
    Ok((listener, Arc::new(Mutex::new(ledger))))
}

/// Routes: `POST /` for JSON-RPC, `GET /health` for liveness.
pub fn router(ledger: SharedLedger) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

async fn health() -> &'static str {
    "OK"
}

fn lock(ledger: &SharedLedger) -> MutexGuard<'_, Ledger> {
    // No handler panics while holding the lock, but a poisoned ledger is
    // still consistent: every mutation completes before it is visible.
    ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn rpc_handler(State(ledger): State<SharedLedger>, body: Bytes) -> Json<Value> {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let error = JsonRpcError::new(codes::PARSE_ERROR, format!("Parse error: {e}"));
            return Json(to_json(JsonRpcResponse::error(Value::Null, error)));
        }
    };

    match payload {
        Value::Array(batch) if !batch.is_empty() => {
            let replies: Vec<Value> = batch
                .into_iter()
                .map(|item| to_json(handle_one(&ledger, item)))
                .collect();
            Json(Value::Array(replies))
        }
        other => Json(to_json(handle_one(&ledger, other))),
    }
}

fn to_json(response: JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

fn handle_one(ledger: &SharedLedger, item: Value) -> JsonRpcResponse {
    let id = item.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(item) {
        Ok(req) => req,
        Err(e) => {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::new(codes::INVALID_REQUEST, format!("Invalid request: {e}")),
            );
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return JsonRpcResponse::error(
            request.id,
            JsonRpcError::new(codes::INVALID_REQUEST, "jsonrpc must be \"2.0\""),
        );
    }

    debug!(method = %request.method, "RPC request");
    let mut ledger = lock(ledger);
    ledger.record_method(&request.method);
    match dispatch(&mut ledger, &request) {
        Ok(result) => JsonRpcResponse::success(request.id, result),
        Err(error) => {
            debug!(method = %request.method, code = error.code, "RPC error: {}", error.message);
            JsonRpcResponse::error(request.id, error)
        }
    }
}

fn dispatch(ledger: &mut Ledger, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    match req.method.as_str() {
        "eth_chainId" => Ok(quantity(ledger.chain_id())),
        "net_version" => Ok(json!(ledger.chain_id().to_string())),
        "eth_blockNumber" => Ok(quantity(ledger.block_number())),
        "eth_gasPrice" => Ok(json!(format_quantity(GAS_PRICE))),
        "eth_getBalance" => {
            let address = address_param(req, 0)?;
            Ok(json!(format_quantity(ledger.account(address).balance)))
        }
        "eth_getTransactionCount" => {
            let address = address_param(req, 0)?;
            Ok(quantity(ledger.account(address).nonce))
        }
        "eth_estimateGas" => {
            let params = tx_params(req)?;
            let data = call_data(&params)?;
            Ok(quantity(ledger.estimate_gas(&data)?))
        }
        "eth_call" => {
            let params = tx_params(req)?;
            let to = params
                .to
                .as_deref()
                .ok_or_else(|| JsonRpcError::invalid_params("eth_call requires 'to'"))?;
            let to = parse_address(to)?;
            let data = call_data(&params)?;
            Ok(json!(format_bytes(&ledger.call(to, &data)?)))
        }
        "eth_sendRawTransaction" => {
            let raw = string_param(req, 0)?;
            let raw = parse_bytes(raw).map_err(|e| JsonRpcError::invalid_params(e.message))?;
            let tx_hash = ledger.apply_raw_transaction(&raw)?;
            Ok(json!(format!("{tx_hash:#x}")))
        }
        "eth_getTransactionReceipt" => {
            let hash = parse_hash(string_param(req, 0)?)
                .map_err(|e| JsonRpcError::invalid_params(e.message))?;
            match ledger.receipt(hash) {
                Some(receipt) => serde_json::to_value(receipt)
                    .map_err(|e| JsonRpcError::new(codes::INTERNAL_ERROR, e.to_string())),
                None => Ok(Value::Null),
            }
        }
        other => Err(JsonRpcError::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

fn quantity(value: u64) -> Value {
    json!(format_quantity(value.into()))
}

fn string_param(req: &JsonRpcRequest, index: usize) -> Result<&str, JsonRpcError> {
    req.param(index)
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_params(format!("missing string parameter {index}")))
}

fn parse_address(value: &str) -> Result<Address, JsonRpcError> {
    value
        .parse()
        .map_err(|_| JsonRpcError::invalid_params(format!("invalid address '{value}'")))
}

fn address_param(req: &JsonRpcRequest, index: usize) -> Result<Address, JsonRpcError> {
    parse_address(string_param(req, index)?)
}

fn tx_params(req: &JsonRpcRequest) -> Result<TxParams, JsonRpcError> {
    let value = req
        .param(0)
        .ok_or_else(|| JsonRpcError::invalid_params("missing call object"))?;
    serde_json::from_value(value.clone())
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid call object: {e}")))
}

fn call_data(params: &TxParams) -> Result<Vec<u8>, JsonRpcError> {
    match params.data.as_deref() {
        Some(hex) => parse_bytes(hex).map_err(|e| JsonRpcError::invalid_params(e.message)),
        None => Ok(Vec::new()),
    }
}
