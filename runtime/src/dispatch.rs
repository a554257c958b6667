use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use wayfinder_core::error::CallError;

use crate::retry::RetryPolicy;
use crate::transport::{
    ProviderTransport, RequestTransport, SessionTransport, TransportLabel,
};

const SESSION_ENDPOINT_ENV: &str = "WAYFINDER_SESSION_ENDPOINT";
const REQUEST_ENDPOINT_ENV: &str = "WAYFINDER_REQUEST_ENDPOINT";
const TRANSPORT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A dispatched result, tagged with the transport that actually served it.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub value: Value,
    pub provider: TransportLabel,
}

/// Primary-then-secondary dispatch.
///
/// The primary (session) transport is preferred for its capability
/// discovery; if it was never constructed, lacks the tool, or its call
/// fails, the dispatcher falls back to the secondary without surfacing the
/// primary's failure. Only when the secondary also fails does the caller
/// see an error — the secondary's, normalized. With no transport configured
/// at all, every dispatch is `<domain>_not_configured`. Every transport
/// call runs under the retry executor.
pub struct FallbackDispatcher {
    primary: Option<Arc<dyn ProviderTransport>>,
    secondary: Option<Arc<dyn ProviderTransport>>,
    retry: RetryPolicy,
}

impl FallbackDispatcher {
    pub fn new(
        primary: Option<Arc<dyn ProviderTransport>>,
        secondary: Option<Arc<dyn ProviderTransport>>,
        retry: RetryPolicy,
    ) -> Self {
        FallbackDispatcher {
            primary,
            secondary,
            retry,
        }
    }

    /// Build transports from the environment. A missing or unusable session
    /// endpoint just means no primary — the deployment runs on the request
    /// transport alone, and vice versa.
    pub fn from_env(retry: RetryPolicy) -> Self {
        let primary = std::env::var(SESSION_ENDPOINT_ENV)
            .ok()
            .and_then(|endpoint| {
                match SessionTransport::connect(&endpoint, TRANSPORT_REQUEST_TIMEOUT) {
                    Ok(transport) => Some(Arc::new(transport) as Arc<dyn ProviderTransport>),
                    Err(err) => {
                        tracing::warn!(error = %err, "session transport unavailable");
                        None
                    }
                }
            });
        let secondary = std::env::var(REQUEST_ENDPOINT_ENV)
            .ok()
            .and_then(|endpoint| {
                match RequestTransport::connect(&endpoint, TRANSPORT_REQUEST_TIMEOUT) {
                    Ok(transport) => Some(Arc::new(transport) as Arc<dyn ProviderTransport>),
                    Err(err) => {
                        tracing::warn!(error = %err, "request transport unavailable");
                        None
                    }
                }
            });
        FallbackDispatcher::new(primary, secondary, retry)
    }

    pub async fn dispatch(
        &self,
        domain: &str,
        tool: &str,
        params: &Value,
    ) -> Result<Dispatched, CallError> {
        let mut primary_error = None;
        if let Some(primary) = &self.primary {
            match self.attempt(primary.as_ref(), domain, tool, params).await {
                Ok(value) => {
                    return Ok(Dispatched {
                        value,
                        provider: primary.label(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        domain,
                        tool,
                        error = %err,
                        "primary transport failed, falling back"
                    );
                    primary_error = Some(err);
                }
            }
        }

        let Some(secondary) = &self.secondary else {
            // With no fallback, the primary's failure is the only story
            // there is to tell.
            return Err(primary_error.unwrap_or_else(|| CallError::NotConfigured {
                domain: domain.to_string(),
            }));
        };

        let value = self
            .attempt(secondary.as_ref(), domain, tool, params)
            .await?;
        Ok(Dispatched {
            value,
            provider: secondary.label(),
        })
    }

    async fn attempt(
        &self,
        transport: &dyn ProviderTransport,
        domain: &str,
        tool: &str,
        params: &Value,
    ) -> Result<Value, CallError> {
        // Capability probe sits outside the retry loop: an absent tool is a
        // routing decision, not a transient failure.
        match transport.supports(tool).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(CallError::ProviderFailed {
                    domain: domain.to_string(),
                    status: None,
                    message: format!("transport does not offer '{tool}'"),
                    attempts: 0,
                });
            }
            Err(err) => return Err(err.into_call_error(domain, 0)),
        }
        self.retry
            .run(domain, || transport.execute(tool, params))
            .await
    }

    /// Close both transports, best-effort.
    pub async fn shutdown(&self) {
        if let Some(primary) = &self.primary {
            primary.close().await;
        }
        if let Some(secondary) = &self.secondary {
            secondary.close().await;
        }
    }
}
