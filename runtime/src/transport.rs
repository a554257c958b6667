use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::retry::TransportError;

const SESSION_PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "x-wayfinder-session";
const CLIENT_NAME: &str = "wayfinder";
const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// Which transport served a call. Read-style callers see this as the
/// `provider` annotation on their results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportLabel {
    Session,
    Request,
}

/// A channel to an external provider aggregator.
///
/// Two shapes exist: a session channel that negotiates capabilities up
/// front, and a plain request channel that answers one call at a time.
/// Object-safe so the dispatcher can hold either as `Arc<dyn ...>`.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    fn label(&self) -> TransportLabel;

    /// Whether this transport offers `tool`. Session transports consult
    /// their discovered tool list; request transports accept everything and
    /// let the provider reject unknown names.
    async fn supports(&self, tool: &str) -> Result<bool, TransportError>;

    async fn execute(&self, tool: &str, params: &Value) -> Result<Value, TransportError>;

    /// Release any held session. Best-effort; default no-op.
    async fn close(&self) {}
}

const _: () = {
    fn _assert_object_safe(_: &dyn ProviderTransport) {}
};

#[derive(Default)]
struct SessionState {
    initialized: bool,
    tools: Option<HashSet<String>>,
}

/// JSON-RPC 2.0 session channel: `initialize` once, `tools/list` for
/// capability discovery (cached for the session's lifetime), `tools/call`
/// per invocation, and a best-effort shutdown notification on close.
pub struct SessionTransport {
    http: reqwest::Client,
    endpoint: Url,
    session_id: String,
    next_id: AtomicI64,
    state: Mutex<SessionState>,
}

impl SessionTransport {
    /// Construction is fallible on purpose — a bad endpoint or client build
    /// failure is exactly the "primary unavailable" case the dispatcher
    /// falls back on.
    pub fn connect(endpoint: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| TransportError::Connect(format!("bad session endpoint: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(SessionTransport {
            http,
            endpoint,
            session_id: Uuid::now_v7().to_string(),
            next_id: AtomicI64::new(1),
            state: Mutex::new(SessionState::default()),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(SESSION_HEADER, &self.session_id)
            .json(&envelope)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }
        let payload: Value = serde_json::from_str(&body)
            .map_err(|err| TransportError::Protocol(format!("invalid rpc body: {err}")))?;
        parse_rpc_payload(payload)
    }

    async fn ensure_session(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }
        drop(state);
        self.rpc(
            "initialize",
            json!({
                "protocolVersion": SESSION_PROTOCOL_VERSION,
                "clientInfo": { "name": CLIENT_NAME },
            }),
        )
        .await?;
        let mut state = self.state.lock().await;
        state.initialized = true;
        Ok(())
    }

    async fn discovered_tools(&self) -> Result<HashSet<String>, TransportError> {
        {
            let state = self.state.lock().await;
            if let Some(tools) = &state.tools {
                return Ok(tools.clone());
            }
        }
        let listing = self.rpc("tools/list", json!({})).await?;
        let tools = parse_tool_listing(&listing)?;
        let mut state = self.state.lock().await;
        state.tools = Some(tools.clone());
        Ok(tools)
    }
}

#[async_trait]
impl ProviderTransport for SessionTransport {
    fn label(&self) -> TransportLabel {
        TransportLabel::Session
    }

    async fn supports(&self, tool: &str) -> Result<bool, TransportError> {
        self.ensure_session().await?;
        Ok(self.discovered_tools().await?.contains(tool))
    }

    async fn execute(&self, tool: &str, params: &Value) -> Result<Value, TransportError> {
        self.ensure_session().await?;
        self.rpc(
            "tools/call",
            json!({ "name": tool, "arguments": params }),
        )
        .await
    }

    async fn close(&self) {
        // Notification, no id: the peer does not answer and we do not wait
        // on the outcome.
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": "notifications/shutdown",
            "params": {},
        });
        let _ = self
            .http
            .post(self.endpoint.clone())
            .header(SESSION_HEADER, &self.session_id)
            .json(&envelope)
            .send()
            .await;
        let mut state = self.state.lock().await;
        state.initialized = false;
        state.tools = None;
    }
}

/// Plain request/response channel: one `POST /invoke/<tool>` per call,
/// params as the JSON body, result as the JSON response.
pub struct RequestTransport {
    http: reqwest::Client,
    base: Url,
}

impl RequestTransport {
    pub fn connect(base: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let base = Url::parse(base)
            .map_err(|err| TransportError::Connect(format!("bad request endpoint: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(RequestTransport { http, base })
    }

    fn invoke_url(&self, tool: &str) -> Result<Url, TransportError> {
        self.base
            .join(&format!("invoke/{tool}"))
            .map_err(|err| TransportError::Protocol(format!("bad tool path: {err}")))
    }
}

#[async_trait]
impl ProviderTransport for RequestTransport {
    fn label(&self) -> TransportLabel {
        TransportLabel::Request
    }

    async fn supports(&self, _tool: &str) -> Result<bool, TransportError> {
        Ok(true)
    }

    async fn execute(&self, tool: &str, params: &Value) -> Result<Value, TransportError> {
        let response = self
            .http
            .post(self.invoke_url(tool)?)
            .json(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }
        serde_json::from_str(&body)
            .map_err(|err| TransportError::Protocol(format!("invalid response body: {err}")))
    }
}

/// Split a JSON-RPC response into result or error. A method-not-found error
/// means the capability is absent, which the dispatcher treats differently
/// from a failing one.
fn parse_rpc_payload(payload: Value) -> Result<Value, TransportError> {
    if let Some(error) = payload.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown rpc error")
            .to_string();
        if code == RPC_METHOD_NOT_FOUND {
            return Err(TransportError::Unsupported(message));
        }
        return Err(TransportError::Protocol(message));
    }
    match payload.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(TransportError::Protocol(
            "rpc response carries neither result nor error".to_string(),
        )),
    }
}

fn parse_tool_listing(listing: &Value) -> Result<HashSet<String>, TransportError> {
    let tools = listing
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::Protocol("tools/list result has no tools".to_string()))?;
    Ok(tools
        .iter()
        .filter_map(|tool| tool.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_result_is_unwrapped() {
        let payload = json!({"jsonrpc": "2.0", "id": 1, "result": {"content": []}});
        assert_eq!(parse_rpc_payload(payload).unwrap(), json!({"content": []}));
    }

    #[test]
    fn rpc_method_not_found_reads_as_unsupported() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "Method not found: tools/call"}
        });
        assert!(matches!(
            parse_rpc_payload(payload),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn other_rpc_errors_read_as_protocol_failures() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32603, "message": "internal"}
        });
        assert!(matches!(
            parse_rpc_payload(payload),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn responses_without_result_or_error_are_rejected() {
        assert!(parse_rpc_payload(json!({"jsonrpc": "2.0", "id": 4})).is_err());
    }

    #[test]
    fn tool_listing_collects_names() {
        let listing = json!({
            "tools": [
                {"name": "destination_search", "inputSchema": {}},
                {"name": "weather_forecast"},
                {"inputSchema": {}},
            ]
        });
        let tools = parse_tool_listing(&listing).unwrap();
        assert!(tools.contains("destination_search"));
        assert!(tools.contains("weather_forecast"));
        assert_eq!(tools.len(), 2);
    }

    #[test]
    fn bad_endpoints_fail_construction() {
        assert!(SessionTransport::connect("not a url", Duration::from_secs(5)).is_err());
        assert!(RequestTransport::connect("::nope::", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn long_error_bodies_are_truncated_on_char_boundaries() {
        let body = "é".repeat(400);
        let cut = truncate(&body, 301);
        assert!(cut.chars().count() <= 152);
        assert!(cut.ends_with('…'));
    }
}
