//! Three-phase hub handshake: negotiate -> connect -> start
//!
//! Each phase retries with exponential backoff. Every attempt, every backoff
//! sleep and every completion is raced against the connection's cancellation
//! token: once the engine leaves CONNECTING the phase resolves as
//! [`PhaseOutcome::Ignored`] instead of failing or advancing.

use crate::infrastructure::config::{ConnectionConfig, RetryConfig};
use crate::ws::connection::WebSocketError;
use crate::ws::protocol::NegotiateResponse;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Handshake phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStep {
    Negotiate,
    Connect,
    Start,
}

impl HandshakeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeStep::Negotiate => "negotiate",
            HandshakeStep::Connect => "connect",
            HandshakeStep::Start => "start",
        }
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the wire produced a handshake error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    Client,
    Remote,
}

/// Failure of a single handshake attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandshakeError {
    /// Transport failure on our side (DNS, TLS, timeout, socket refused)
    #[error("client error: {message}")]
    Client { message: String },
    /// Non-200 answer from the server
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },
    /// 200 answer whose body is unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl HandshakeError {
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            HandshakeError::Client { .. } => ErrorOrigin::Client,
            HandshakeError::Remote { .. } | HandshakeError::InvalidResponse(_) => {
                ErrorOrigin::Remote
            }
        }
    }

    /// HTTP status for remote errors
    pub fn code(&self) -> Option<u16> {
        match self {
            HandshakeError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Transport failures and non-200 answers are retried; a malformed body is not
    pub fn is_retryable(&self) -> bool {
        !matches!(self, HandshakeError::InvalidResponse(_))
    }
}

impl From<reqwest::Error> for HandshakeError {
    fn from(e: reqwest::Error) -> Self {
        HandshakeError::Client {
            message: e.to_string(),
        }
    }
}

impl From<WebSocketError> for HandshakeError {
    fn from(e: WebSocketError) -> Self {
        HandshakeError::Client {
            message: e.to_string(),
        }
    }
}

/// Result of a phase that may have been overtaken by a disconnect
#[derive(Debug, PartialEq, Eq)]
pub enum PhaseOutcome<T> {
    Done(T),
    /// The engine left CONNECTING; nothing was advanced
    Ignored,
}

/// Wall-clock completion time of each phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimestamps {
    pub negotiate: Option<OffsetDateTime>,
    pub connect: Option<OffsetDateTime>,
    pub start: Option<OffsetDateTime>,
}

/// Upper bound for a server-advertised `TransportConnectTimeout`
pub const MAX_TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-attempt handshake state, discarded on disconnect
#[derive(Debug, Clone)]
pub struct HandshakeContext {
    pub connection_id: String,
    pub connection_token: String,
    /// Protocol version echoed by the server, used on the connect phase
    pub protocol_version: String,
    pub transport_connect_timeout: Option<Duration>,
    pub timestamps: PhaseTimestamps,
}

impl HandshakeContext {
    pub fn from_negotiate(negotiated: NegotiateResponse, config: &ConnectionConfig) -> Self {
        let transport_connect_timeout = negotiated
            .transport_connect_timeout
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(|timeout| timeout.min(MAX_TRANSPORT_CONNECT_TIMEOUT));
        Self {
            connection_id: negotiated.connection_id,
            connection_token: negotiated.connection_token,
            protocol_version: negotiated
                .protocol_version
                .unwrap_or_else(|| config.client_protocol.clone()),
            transport_connect_timeout,
            timestamps: PhaseTimestamps {
                negotiate: Some(OffsetDateTime::now_utc()),
                ..PhaseTimestamps::default()
            },
        }
    }

    /// Socket open timeout: twice the advertised transport timeout
    pub fn socket_open_timeout(&self, config: &ConnectionConfig) -> Duration {
        self.transport_connect_timeout
            .map(|t| t.saturating_mul(2))
            .unwrap_or_else(|| config.connect_timeout())
    }
}

/// URL construction for the three phases
pub mod endpoints {
    use super::*;

    /// `connectionData`: JSON array naming the hub
    pub fn connection_data(config: &ConnectionConfig) -> String {
        json!([{ "name": config.hub }]).to_string()
    }

    fn build(base: &str, path: &str, params: &[(&str, &str)]) -> Result<Url, HandshakeError> {
        let raw = format!("{}/{}", base.trim_end_matches('/'), path);
        Url::parse_with_params(&raw, params).map_err(|e| HandshakeError::Client {
            message: format!("invalid url {raw}: {e}"),
        })
    }

    pub fn negotiate_url(config: &ConnectionConfig) -> Result<Url, HandshakeError> {
        let data = connection_data(config);
        build(
            &config.http_base,
            "negotiate",
            &[
                ("clientProtocol", config.client_protocol.as_str()),
                ("transport", "serverSentEvents"),
                ("connectionData", data.as_str()),
            ],
        )
    }

    pub fn connect_url(
        config: &ConnectionConfig,
        context: &HandshakeContext,
        tid: i128,
    ) -> Result<Url, HandshakeError> {
        let data = connection_data(config);
        let tid = tid.to_string();
        build(
            &config.ws_base,
            "connect",
            &[
                ("clientProtocol", context.protocol_version.as_str()),
                ("transport", "webSockets"),
                ("connectionToken", context.connection_token.as_str()),
                ("connectionData", data.as_str()),
                ("tid", tid.as_str()),
            ],
        )
    }

    pub fn start_url(
        config: &ConnectionConfig,
        context: &HandshakeContext,
    ) -> Result<Url, HandshakeError> {
        let data = connection_data(config);
        build(
            &config.http_base,
            "start",
            &[
                ("clientProtocol", config.client_protocol.as_str()),
                ("transport", "webSockets"),
                ("connectionToken", context.connection_token.as_str()),
                ("connectionData", data.as_str()),
            ],
        )
    }

    /// Timestamp-derived tie-breaker for the connect URL
    pub fn tid() -> i128 {
        OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
    }
}

/// GET returning the body of a 200 response
async fn http_get(
    http: &reqwest::Client,
    url: Url,
    config: &ConnectionConfig,
) -> Result<String, HandshakeError> {
    let response = http
        .get(url)
        .header(reqwest::header::USER_AGENT, config.user_agent.as_str())
        .timeout(config.request_timeout())
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(HandshakeError::Remote {
            code: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unknown").to_string(),
        });
    }

    Ok(response.text().await?)
}

/// One negotiate attempt
pub async fn negotiate(
    http: &reqwest::Client,
    config: &ConnectionConfig,
) -> Result<NegotiateResponse, HandshakeError> {
    let url = endpoints::negotiate_url(config)?;
    let body = http_get(http, url, config).await?;
    serde_json::from_str(&body).map_err(|e| HandshakeError::InvalidResponse(e.to_string()))
}

/// One start attempt
pub async fn start(
    http: &reqwest::Client,
    config: &ConnectionConfig,
    context: &HandshakeContext,
) -> Result<(), HandshakeError> {
    let url = endpoints::start_url(config, context)?;
    http_get(http, url, config).await.map(|_| ())
}

/// Drive `attempt` until it succeeds, fails for good, or `cancel` fires
pub async fn with_retry<T, F, Fut>(
    step: HandshakeStep,
    policy: &RetryConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<PhaseOutcome<T>, HandshakeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HandshakeError>>,
{
    let mut retries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(PhaseOutcome::Ignored);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(PhaseOutcome::Ignored),
            result = attempt() => result,
        };

        // A disconnect that raced the response wins
        if cancel.is_cancelled() {
            return Ok(PhaseOutcome::Ignored);
        }

        match result {
            Ok(value) => return Ok(PhaseOutcome::Done(value)),
            Err(error) if error.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay(retries);
                crate::log_ws!(
                    tracing::Level::WARN,
                    step = step.as_str(),
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "handshake phase failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(PhaseOutcome::Ignored),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(error) => return Err(error),
        }
    }
}
