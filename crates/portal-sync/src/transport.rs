//! # Transport
//!
//! The request/response contract between the sync engine and the server,
//! plus the default HTTP implementation.
//!
//! ## Envelope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request   { action, status, item? | diff? }                           │
//! │  response  { success, cargo?, errors[], messages[{type, text}] }       │
//! │                                                                         │
//! │  success=false  ──► SyncError::Rejected { messages }                   │
//! │  HTTP 401       ──► SyncError::Unauthorized                            │
//! │  other non-2xx  ──► SyncError::Http { status, message }                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Strategy
//! ```text
//! attempt ── ConnectionFailed ──► wait 500ms ──► attempt ──► wait 1s ──► ...
//!    │                                                      (max_retries)
//!    └── any other outcome is returned as-is
//! ```
//!
//! Only failures to reach the server are retried: once a request has been
//! delivered, sending it again could apply an action twice.

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use portal_core::{Action, PatchOp, Status};

use crate::config::ApiConfig;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Get | Action::GetOrNew | Action::Export => Method::Get,
            Action::New | Action::Copy => Method::Post,
            Action::Save
            | Action::Publish
            | Action::Unpublish
            | Action::DiscardEdits
            | Action::Archive => Method::Put,
            Action::Delete => Method::Delete,
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// JSON body of an action request. Carries either the full item or a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub action: Action,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<PatchOp>>,
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub method: Method,
    pub body: Option<RequestBody>,
    /// The caller handles failures quietly; transports log them at debug.
    pub swallow: bool,
}

impl SendOptions {
    pub fn get() -> Self {
        Self {
            method: Method::Get,
            body: None,
            swallow: false,
        }
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_success")]
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo: Option<Value>,

    /// Strings or `{text|message}` objects, depending on the endpoint.
    #[serde(default)]
    pub errors: Vec<Value>,

    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_success() -> bool {
    true
}

impl Response {
    pub fn ok(cargo: Value) -> Self {
        Self {
            success: true,
            cargo: Some(cargo),
            errors: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn rejected<S: Into<String>>(errors: impl IntoIterator<Item = S>) -> Self {
        Self {
            success: false,
            cargo: None,
            errors: errors.into_iter().map(|e| Value::String(e.into())).collect(),
            messages: Vec::new(),
        }
    }

    /// Human-readable text of every error, followed by error-type messages.
    pub fn error_messages(&self) -> Vec<String> {
        let errors = self.errors.iter().map(|err| match err {
            Value::String(text) => text.clone(),
            Value::Object(map) => map
                .get("text")
                .or_else(|| map.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
            other => other.to_string(),
        });
        let messages = self
            .messages
            .iter()
            .filter(|m| m.kind == "error")
            .map(|m| m.text.clone());
        errors.chain(messages).collect()
    }

    /// The payload of a successful response.
    pub fn into_cargo(self) -> SyncResult<Option<Value>> {
        if !self.success {
            return Err(SyncError::Rejected {
                messages: self.error_messages(),
            });
        }
        Ok(self.cargo.filter(|cargo| !cargo.is_null()))
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Sends one request to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &Url, options: SendOptions) -> SyncResult<Response>;
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout.
    pub timeout: Duration,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Retries after a connection failure (0 = fail on the first).
    pub max_retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

impl From<&ApiConfig> for TransportConfig {
    fn from(api: &ApiConfig) -> Self {
        TransportConfig {
            timeout: Duration::from_secs(api.timeout_secs),
            initial_backoff: Duration::from_millis(api.initial_backoff_ms),
            max_backoff: Duration::from_secs(api.max_backoff_secs),
            max_retries: api.max_retries,
        }
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn send_once(&self, url: &Url, options: &SendOptions) -> SyncResult<Response> {
        let mut request = self.client.request(options.method.into(), url.clone());
        if let (Some(body), false) = (&options.body, options.method == Method::Get) {
            request = request.json(body);
        }

        let secs = self.config.timeout.as_secs();
        let response = match timeout(self.config.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(SyncError::Timeout(secs)),
            Ok(Err(e)) => return Err(SyncError::from(e)),
            Err(_) => return Err(SyncError::Timeout(secs)),
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SyncError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Response>()
            .await
            .map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &Url, options: SendOptions) -> SyncResult<Response> {
        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            match self.send_once(url, &options).await {
                Err(SyncError::ConnectionFailed(reason)) if retry_count < self.config.max_retries => {
                    retry_count += 1;
                    let Some(duration) = backoff.next_backoff() else {
                        return Err(SyncError::ConnectionFailed(reason));
                    };
                    debug!(%url, %reason, ?duration, attempt = retry_count, "Retrying request");
                    tokio::time::sleep(duration).await;
                }
                Err(e) => {
                    if options.swallow {
                        debug!(%url, error = %e, "Request failed");
                    } else {
                        warn!(%url, error = %e, "Request failed");
                    }
                    return Err(e);
                }
                Ok(response) => return Ok(response),
            }
        }
    }
}
