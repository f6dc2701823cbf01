use crate::address::Address;
use crate::errors::RemoteCallError;
use crate::rpc_provider::{EndpointRegistry, RpcEndpoint};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC request failed: {0}")]
    RequestFailed(String),

    #[error("RPC node timeout")]
    NodeTimeout,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("no healthy RPC endpoint available")]
    NoHealthyEndpoint,
}

impl RpcError {
    /// Transport-level failures that justify trying the next endpoint.
    /// Node-level errors (reverts, bad params) are answers, not outages.
    fn is_retryable(&self) -> bool {
        match self {
            Self::NodeTimeout | Self::Network(_) => true,
            Self::Http(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Node { code, .. } if *code == METHOD_NOT_FOUND)
    }

    /// Attach the contract-level call name for surfacing upward.
    pub fn into_remote(self, call: &str) -> RemoteCallError {
        RemoteCallError::new(call, self)
    }
}

/// Transaction hash as returned by the node (`0x` + 64 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: String,
    #[serde(flatten)]
    result: ResponseResult,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseResult {
    Error {
        error: RpcErrorObject,
    },
    Success {
        #[serde(default)]
        result: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// A mined transaction's receipt, reduced to what the client needs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub block_number: Option<String>,
    /// `0x1` success, `0x0` reverted. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s != "0x0")
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|b| parse_quantity(b).ok())
    }
}

/// Parse a hex quantity such as `"0x1b4"`.
pub fn parse_quantity(value: &str) -> Result<u64, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::UnexpectedResponse(format!("quantity without 0x: {value}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::UnexpectedResponse(format!("bad quantity {value}: {e}")))
}

fn decode_hex_data(value: &Value) -> Result<Vec<u8>, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::UnexpectedResponse(format!("expected hex string, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| RpcError::UnexpectedResponse(format!("bad hex data: {e}")))
}

/// Methods whose effects must never be duplicated across endpoints.
fn is_submission(method: &str) -> bool {
    matches!(method, "eth_sendTransaction" | "eth_sendRawTransaction")
}

/// JSON-RPC client over the endpoint registry.
///
/// Reads fail over to the next healthy endpoint on transport errors.
/// Submissions go to the first healthy endpoint once and are never retried.
pub struct RpcClient {
    registry: Arc<EndpointRegistry>,
    client: Client,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(registry: Arc<EndpointRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            client: Client::new(),
            request_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let endpoints = self.registry.available_endpoints();
        let mut last_err = None;

        for endpoint in endpoints {
            match self.send_to(endpoint, method, &params).await {
                Ok(value) => {
                    self.registry.report_success(&endpoint.url);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    self.registry.report_failure(&endpoint.url);
                    if is_submission(method) {
                        return Err(e);
                    }
                    tracing::warn!(
                        endpoint = %endpoint.name,
                        method,
                        error = %e,
                        "RPC read failed, trying next endpoint"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(RpcError::NoHealthyEndpoint))
    }

    async fn send_to(
        &self,
        endpoint: &RpcEndpoint,
        method: &str,
        params: &Value,
    ) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::debug!(endpoint = %endpoint.name, method, "Sending JSON-RPC request");

        let req = endpoint.authorize(self.client.post(&endpoint.url).json(&request));
        let response = tokio::time::timeout(self.request_timeout, req.send())
            .await
            .map_err(|_| RpcError::NodeTimeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::NodeTimeout
                } else if e.is_connect() {
                    RpcError::Network(e)
                } else {
                    RpcError::RequestFailed(format!("Network error: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Http(response.status().as_u16()));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::RequestFailed(format!("Failed to parse response: {}", e)))?;

        match body.result {
            ResponseResult::Error { error } => {
                tracing::debug!(
                    code = error.code,
                    data = ?error.data,
                    "RPC error: {}",
                    error.message
                );
                Err(RpcError::Node {
                    code: error.code,
                    message: error.message,
                })
            }
            ResponseResult::Success { result } => Ok(result),
        }
    }

    // ── Ethereum helpers ──────────────────────────────────────────────────

    /// Read-only contract call against the latest block.
    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = json!([
            { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let result = self.call("eth_call", params).await?;
        decode_hex_data(&result)
    }

    /// Accounts exposed by the node. With `request == true` this asks the
    /// provider to authorize access first (`eth_requestAccounts`).
    pub async fn accounts(&self, request: bool) -> Result<Vec<Address>, RpcError> {
        let method = if request { "eth_requestAccounts" } else { "eth_accounts" };
        let result = self.call(method, json!([])).await?;
        serde_json::from_value(result).map_err(RpcError::from)
    }

    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: &[u8],
    ) -> Result<TxHash, RpcError> {
        let params = json!([{
            "from": from.to_string(),
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }]);
        let result = self.call("eth_sendTransaction", params).await?;
        serde_json::from_value(result).map_err(RpcError::from)
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u64, RpcError> {
        let result = self.call(method, params).await?;
        let text = result
            .as_str()
            .ok_or_else(|| RpcError::UnexpectedResponse(format!("expected quantity, got {result}")))?;
        parse_quantity(text)
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        self.quantity("eth_chainId", json!([])).await
    }

    /// Next nonce for `address`, counting transactions still in the pool.
    pub async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        self.quantity("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await
    }

    pub async fn gas_price(&self) -> Result<u64, RpcError> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: &[u8],
    ) -> Result<u64, RpcError> {
        let params = json!([{
            "from": from.to_string(),
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }]);
        self.quantity("eth_estimateGas", params).await
    }

    /// Broadcast an already signed transaction envelope.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError> {
        let params = json!([format!("0x{}", hex::encode(raw))]);
        let result = self.call("eth_sendRawTransaction", params).await?;
        serde_json::from_value(result).map_err(RpcError::from)
    }

    /// `None` while the transaction is still pending.
    pub async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([&hash.0]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result).map(Some).map_err(RpcError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_response_success_and_error_shapes() {
        let ok: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        assert!(matches!(ok.result, ResponseResult::Success { result } if result == "0x10"));

        let pending: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(matches!(pending.result, ResponseResult::Success { result } if result.is_null()));

        let err: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted","data":"0x"}}"#,
        )
        .unwrap();
        assert!(matches!(err.result, ResponseResult::Error { error } if error.code == 3));
    }

    #[test]
    fn test_receipt_status() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x2a",
            "status": "0x0",
            "gasUsed": "0x5208"
        }))
        .unwrap();
        assert!(!receipt.succeeded());
        assert_eq!(receipt.block(), Some(42));

        let legacy: TransactionReceipt =
            serde_json::from_value(json!({ "transactionHash": "0xabc" })).unwrap();
        assert!(legacy.succeeded());
        assert_eq!(legacy.block(), None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RpcError::NodeTimeout.is_retryable());
        assert!(RpcError::Http(429).is_retryable());
        assert!(RpcError::Http(503).is_retryable());
        assert!(!RpcError::Http(400).is_retryable());
        assert!(!RpcError::Http(404).is_retryable());
        let reverted = RpcError::Node {
            code: 3,
            message: "execution reverted".into(),
        };
        assert!(!reverted.is_retryable());
        assert!(!reverted.is_method_not_found());
        assert!(RpcError::Node {
            code: METHOD_NOT_FOUND,
            message: "the method eth_requestAccounts does not exist".into(),
        }
        .is_method_not_found());
    }

    #[test]
    fn test_decode_hex_data() {
        assert_eq!(decode_hex_data(&json!("0x0102")).unwrap(), vec![1, 2]);
        assert_eq!(decode_hex_data(&json!("0x")).unwrap(), Vec::<u8>::new());
        assert!(decode_hex_data(&json!(12)).is_err());
    }

    #[tokio::test]
    async fn test_call_without_endpoints() {
        let client = RpcClient::new(EndpointRegistry::new(vec![]), Duration::from_secs(1));
        let err = client.call("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::NoHealthyEndpoint));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_reported() {
        let client = RpcClient::new(
            EndpointRegistry::new(vec![RpcEndpoint::new("dead", "http://127.0.0.1:9")]),
            Duration::from_secs(2),
        );
        let result = client.call("eth_blockNumber", json!([])).await;
        assert!(result.is_err());
    }
}
