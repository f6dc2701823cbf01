//! Endpoint health tracking for the JSON-RPC client.
//!
//! Endpoints are kept in configured order. Each carries a small breaker:
//! after [`FAILURE_THRESHOLD`] consecutive failures it is skipped for
//! [`COOLDOWN`], then offered again. A background task reads
//! `eth_blockNumber` from every endpoint so a recovered node comes back
//! without waiting for live traffic.

use crate::rpc::{parse_quantity, RpcError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

const FAILURE_THRESHOLD: u64 = 3;

const COOLDOWN: Duration = Duration::from_secs(5 * 60);

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A JSON-RPC endpoint, optionally sending one auth header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    /// Label used in logs: `primary`, `fallback-1`, ...
    pub name: String,
    pub url: String,
    pub auth_header: Option<String>,
    pub auth_value: Option<String>,
}

impl RpcEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth_header: None,
            auth_value: None,
        }
    }

    pub(crate) fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.auth_value) {
            (Some(header), Some(value)) => req.header(header.as_str(), value.as_str()),
            _ => req,
        }
    }
}

/// Consecutive-failure breaker for one endpoint.
#[derive(Debug, Default)]
struct Breaker {
    failures: u64,
    open_since: Option<Instant>,
}

impl Breaker {
    /// Returns whether the breaker was open.
    fn succeed(&mut self) -> bool {
        self.failures = 0;
        self.open_since.take().is_some()
    }

    /// Returns whether this failure opened the breaker.
    fn fail(&mut self, now: Instant) -> bool {
        self.failures += 1;
        if self.failures < FAILURE_THRESHOLD {
            return false;
        }
        // A failure after the cooldown restarts it.
        let opened = self.open_since.is_none();
        self.open_since = Some(now);
        opened
    }

    fn admits(&self, now: Instant) -> bool {
        self.open_since
            .map_or(true, |since| now.duration_since(since) >= COOLDOWN)
    }
}

struct TrackedEndpoint {
    endpoint: RpcEndpoint,
    breaker: Mutex<Breaker>,
}

impl TrackedEndpoint {
    fn breaker(&self) -> MutexGuard<'_, Breaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_success(&self) {
        if self.breaker().succeed() {
            tracing::info!(endpoint = %self.endpoint.name, "Endpoint back in rotation");
        }
    }

    fn record_failure(&self) {
        let (opened, failures) = {
            let mut breaker = self.breaker();
            (breaker.fail(Instant::now()), breaker.failures)
        };
        if opened {
            tracing::warn!(
                endpoint = %self.endpoint.name,
                url = %self.endpoint.url,
                failures,
                cooldown_secs = COOLDOWN.as_secs(),
                "Endpoint taken out of rotation"
            );
        }
    }
}

#[derive(Deserialize)]
struct BlockNumberReply {
    #[serde(default)]
    result: Option<String>,
}

/// Configured endpoints and their breakers, shared by the RPC client and
/// the background health checks.
pub struct EndpointRegistry {
    tracked: Vec<TrackedEndpoint>,
    client: Client,
}

impl EndpointRegistry {
    /// `endpoints` in preference order. The first available one also
    /// receives every transaction submission.
    pub fn new(endpoints: Vec<RpcEndpoint>) -> Arc<Self> {
        let tracked = endpoints
            .into_iter()
            .map(|endpoint| TrackedEndpoint {
                endpoint,
                breaker: Mutex::default(),
            })
            .collect();
        Arc::new(Self {
            tracked,
            client: Client::new(),
        })
    }

    /// Endpoints whose breaker admits traffic, in preference order.
    pub fn available_endpoints(&self) -> Vec<&RpcEndpoint> {
        let now = Instant::now();
        self.tracked
            .iter()
            .filter(|t| t.breaker().admits(now))
            .map(|t| &t.endpoint)
            .collect()
    }

    pub fn report_success(&self, url: &str) {
        if let Some(tracked) = self.find(url) {
            tracked.record_success();
        }
    }

    pub fn report_failure(&self, url: &str) {
        if let Some(tracked) = self.find(url) {
            tracked.record_failure();
        }
    }

    /// Check every endpoint each `every` until the returned task is aborted.
    pub fn spawn_health_checks(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.check_all().await;
            }
        })
    }

    async fn check_all(&self) {
        for tracked in &self.tracked {
            match self.block_number(&tracked.endpoint).await {
                Ok(block) => {
                    tracing::debug!(endpoint = %tracked.endpoint.name, block, "Health check passed");
                    tracked.record_success();
                }
                Err(e) => {
                    tracing::warn!(endpoint = %tracked.endpoint.name, error = %e, "Health check failed");
                    tracked.record_failure();
                }
            }
        }
    }

    async fn block_number(&self, endpoint: &RpcEndpoint) -> Result<u64, RpcError> {
        let body = json!({"jsonrpc": "2.0", "id": 0, "method": "eth_blockNumber", "params": []});
        let req = endpoint.authorize(self.client.post(&endpoint.url).json(&body));

        let response = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, req.send())
            .await
            .map_err(|_| RpcError::NodeTimeout)??;
        if !response.status().is_success() {
            return Err(RpcError::Http(response.status().as_u16()));
        }

        let reply: BlockNumberReply = response.json().await?;
        let block = reply
            .result
            .ok_or_else(|| RpcError::UnexpectedResponse("eth_blockNumber without result".into()))?;
        parse_quantity(&block)
    }

    fn find(&self, url: &str) -> Option<&TrackedEndpoint> {
        self.tracked.iter().find(|t| t.endpoint.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::Value;

    fn registry(urls: &[&str]) -> Arc<EndpointRegistry> {
        EndpointRegistry::new(
            urls.iter()
                .enumerate()
                .map(|(i, url)| RpcEndpoint::new(format!("node-{i}"), *url))
                .collect(),
        )
    }

    fn urls(registry: &EndpointRegistry) -> Vec<String> {
        registry
            .available_endpoints()
            .into_iter()
            .map(|e| e.url.clone())
            .collect()
    }

    #[test]
    fn test_breaker_opens_at_threshold_and_reopens_after_cooldown() {
        let start = Instant::now();
        let mut breaker = Breaker::default();
        assert!(!breaker.fail(start));
        assert!(!breaker.fail(start));
        assert!(breaker.fail(start));
        assert!(!breaker.admits(start + COOLDOWN / 2));
        assert!(breaker.admits(start + COOLDOWN));

        // Still failing after the cooldown: out again, but not newly opened.
        assert!(!breaker.fail(start + COOLDOWN));
        assert!(!breaker.admits(start + COOLDOWN + COOLDOWN / 2));
        assert!(breaker.succeed());
        assert!(breaker.admits(start));
    }

    #[test]
    fn test_endpoints_keep_configured_order() {
        let registry = registry(&["http://a.test", "http://b.test"]);
        assert_eq!(urls(&registry), vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_failing_endpoint_leaves_rotation() {
        let registry = registry(&["http://a.test", "http://b.test"]);
        for _ in 0..FAILURE_THRESHOLD {
            registry.report_failure("http://a.test");
        }
        assert_eq!(urls(&registry), vec!["http://b.test"]);

        registry.report_success("http://a.test");
        assert_eq!(urls(&registry).len(), 2);
    }

    #[test]
    fn test_success_breaks_a_failure_streak() {
        let registry = registry(&["http://a.test"]);
        registry.report_failure("http://a.test");
        registry.report_failure("http://a.test");
        registry.report_success("http://a.test");
        registry.report_failure("http://a.test");
        assert_eq!(urls(&registry).len(), 1);
    }

    #[test]
    fn test_unknown_url_is_ignored() {
        let registry = registry(&["http://a.test"]);
        for _ in 0..FAILURE_THRESHOLD {
            registry.report_failure("http://elsewhere.test");
        }
        assert_eq!(urls(&registry).len(), 1);
    }

    /// Node answering block 0x2a and remembering the last auth header.
    async fn spawn_block_number_node() -> (String, Arc<Mutex<Option<String>>>) {
        let seen = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);
        let app = Router::new().route(
            "/",
            post(move |headers: HeaderMap, Json(req): Json<Value>| {
                let record = Arc::clone(&record);
                async move {
                    *record.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let result = if req["method"] == "eth_blockNumber" { json!("0x2a") } else { Value::Null };
                    Json(json!({"jsonrpc": "2.0", "id": req["id"], "result": result}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn test_block_number_sends_auth_header() {
        let (url, seen) = spawn_block_number_node().await;
        let mut endpoint = RpcEndpoint::new("a", url);
        endpoint.auth_header = Some("Authorization".to_string());
        endpoint.auth_value = Some("Bearer node-key".to_string());
        let registry = EndpointRegistry::new(vec![endpoint.clone()]);

        assert_eq!(registry.block_number(&endpoint).await.unwrap(), 42);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("Bearer node-key"));
    }

    #[tokio::test]
    async fn test_health_check_restores_endpoint() {
        let (url, _) = spawn_block_number_node().await;
        let registry = registry(&[url.as_str()]);
        for _ in 0..FAILURE_THRESHOLD {
            registry.report_failure(&url);
        }
        assert!(registry.available_endpoints().is_empty());

        registry.check_all().await;
        assert_eq!(urls(&registry), vec![url]);
    }

    #[tokio::test]
    async fn test_health_checks_take_dead_endpoint_out() {
        // Nothing listens on port 1.
        let registry = registry(&["http://127.0.0.1:1"]);
        for _ in 0..FAILURE_THRESHOLD {
            registry.check_all().await;
        }
        assert!(registry.available_endpoints().is_empty());
    }
}
