//! One-shot verification flow.
//!
//! Each run walks a fixed state machine and ends in exactly one terminal
//! state:
//!
//! ```text
//! INIT -> RESOLVE -> DISPATCH -> PARSE -> VERIFY -> VERIFIED | REJECTED
//!            |           |         |        |
//!            +-----------+---------+--------+-----> FAILED
//! ```
//!
//! Offline runs skip DISPATCH. Every error is caught here, logged with the
//! state it occurred in, and reported as [`Outcome::Failed`]. Runs are
//! never retried and share no mutable state, so independent runs can
//! execute concurrently on one [`VerificationFlow`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use crate::crypto::CryptoProvider;
use crate::envelope::{self, EnvelopeError, RequestEnvelope, ResponseEnvelope};
use crate::identity::AgentRecord;
use crate::registry::{RegistryClient, RegistryError};
use crate::verifier::{self, VerifyError};

/// Path of the plain chat endpoint.
pub const CHAT_PATH: &str = "/chat";
/// Path of the encrypted chat endpoint.
pub const PRIVACY_CHAT_PATH: &str = "/privacy_chat";

/// Longest body excerpt kept in error messages.
const BODY_EXCERPT_LEN: usize = 200;

/// Flow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Init,
    Resolve,
    Dispatch,
    Parse,
    Verify,
    Verified,
    Rejected,
    Failed,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowState::Init => "INIT",
            FlowState::Resolve => "RESOLVE",
            FlowState::Dispatch => "DISPATCH",
            FlowState::Parse => "PARSE",
            FlowState::Verify => "VERIFY",
            FlowState::Verified => "VERIFIED",
            FlowState::Rejected => "REJECTED",
            FlowState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// What the caller wants verified.
#[derive(Debug, Clone)]
pub enum FlowRequest {
    /// Call `path` on the agent; POST `body` if given, else GET.
    Endpoint { path: String, body: Option<Value> },
    /// POST `{"message": ..}` to the chat endpoint.
    Chat { message: String },
    /// POST an encrypted `{"message": ..}` to the privacy chat endpoint.
    PrivacyChat { message: String },
    /// Verify a response body obtained elsewhere.
    Offline { response: String },
}

/// Outbound request as it was sent.
#[derive(Debug, Clone)]
pub struct DispatchInfo {
    pub method: Method,
    pub url: Url,
    pub envelope: Option<RequestEnvelope>,
    pub http_status: Option<u16>,
}

/// Terminal result of a run.
#[derive(Debug)]
pub enum Outcome {
    /// Signature matches the registered identity.
    Verified,
    /// Signature does not match. Final.
    Rejected,
    /// The run could not reach a verdict.
    Failed { state: FlowState, error: FlowError },
}

impl Outcome {
    pub fn state(&self) -> FlowState {
        match self {
            Outcome::Verified => FlowState::Verified,
            Outcome::Rejected => FlowState::Rejected,
            Outcome::Failed { .. } => FlowState::Failed,
        }
    }
}

/// Everything observed during one run.
#[derive(Debug)]
pub struct FlowReport {
    pub run_id: Uuid,
    pub agent_id: u64,
    pub record: Option<AgentRecord>,
    pub dispatch: Option<DispatchInfo>,
    pub response: Option<ResponseEnvelope>,
    /// States entered, in order, ending with the terminal state.
    pub trace: Vec<FlowState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl FlowReport {
    pub fn is_verified(&self) -> bool {
        matches!(self.outcome, Outcome::Verified)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, Outcome::Rejected)
    }

    pub fn error(&self) -> Option<&FlowError> {
        match &self.outcome {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Runs verification flows against one registry.
pub struct VerificationFlow {
    registry: Arc<dyn RegistryClient>,
    crypto: Arc<dyn CryptoProvider>,
    http: reqwest::Client,
}

impl VerificationFlow {
    /// Create a flow whose agent requests time out after `http_timeout`.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        crypto: Arc<dyn CryptoProvider>,
        http_timeout: Duration,
    ) -> Result<Self, FlowError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| FlowError::Client(e.to_string()))?;
        Ok(Self {
            registry,
            crypto,
            http,
        })
    }

    /// Run to completion.
    pub async fn run(&self, agent_id: u64, request: FlowRequest) -> FlowReport {
        self.run_until(agent_id, request, std::future::pending()).await
    }

    /// Run until completion or until `interrupt` resolves.
    ///
    /// An interrupt aborts the in-flight network call and ends the run in
    /// FAILED.
    pub async fn run_until<I>(
        &self,
        agent_id: u64,
        request: FlowRequest,
        interrupt: I,
    ) -> FlowReport
    where
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let mut run = Run::new(agent_id);
        tracing::info!(run_id = %run.run_id, agent_id, "Starting verification flow");

        // RESOLVE
        run.enter(FlowState::Resolve);
        let record =
            match interruptible(&mut interrupt, self.registry.resolve(agent_id)).await {
                Ok(record) => record,
                Err(e) => return run.fail(e),
            };
        tracing::info!(
            run_id = %run.run_id,
            agent_id,
            scheme = %record.scheme(),
            url = record.service_url(),
            "Agent resolved on-chain"
        );
        run.record = Some(record.clone());

        // DISPATCH
        let body = match request {
            FlowRequest::Offline { response } => response.into_bytes(),
            online => {
                run.enter(FlowState::Dispatch);
                let (method, url, envelope) = match self.prepare(&record, online) {
                    Ok(parts) => parts,
                    Err(e) => return run.fail(e),
                };
                run.dispatch = Some(DispatchInfo {
                    method: method.clone(),
                    url: url.clone(),
                    envelope: envelope.clone(),
                    http_status: None,
                });

                let sent = self.send(method, url, envelope.as_ref());
                let (status, body) = match interruptible(&mut interrupt, sent).await {
                    Ok(reply) => reply,
                    Err(e) => return run.fail(e),
                };
                if let Some(dispatch) = run.dispatch.as_mut() {
                    dispatch.http_status = Some(status.as_u16());
                }

                if !status.is_success() {
                    run.enter(FlowState::Parse);
                    return run.fail(FlowError::Envelope(EnvelopeError::MalformedResponse(
                        format!("agent returned HTTP {status}: {}", excerpt(&body)),
                    )));
                }
                body
            }
        };

        // PARSE
        run.enter(FlowState::Parse);
        let response = match envelope::decode_response(&body) {
            Ok(response) => response,
            Err(e) => return run.fail(e.into()),
        };

        // VERIFY
        run.enter(FlowState::Verify);
        let verdict = verifier::verify(self.crypto.as_ref(), &record, &response);
        run.response = Some(response);
        match verdict {
            Ok(true) => run.finish(Outcome::Verified),
            Ok(false) => run.finish(Outcome::Rejected),
            Err(e) => run.fail(e.into()),
        }
    }

    /// Build the HTTP method, URL and body for an online request.
    fn prepare(
        &self,
        record: &AgentRecord,
        request: FlowRequest,
    ) -> Result<(Method, Url, Option<RequestEnvelope>), FlowError> {
        let (path, envelope) = match request {
            FlowRequest::Endpoint { path, body } => (path, body.map(RequestEnvelope::Plain)),
            FlowRequest::Chat { message } => (
                CHAT_PATH.to_string(),
                Some(RequestEnvelope::Plain(json!({ "message": message }))),
            ),
            FlowRequest::PrivacyChat { message } => {
                let encrypted = envelope::encode_encrypted(
                    self.crypto.as_ref(),
                    record.encryption_key(),
                    &json!({ "message": message }),
                )?;
                (
                    PRIVACY_CHAT_PATH.to_string(),
                    Some(RequestEnvelope::Encrypted(encrypted)),
                )
            }
            FlowRequest::Offline { .. } => {
                return Err(FlowError::Client("offline requests are not dispatched".into()));
            }
        };

        let url = record
            .endpoint(&path)
            .map_err(|e| FlowError::Endpoint(format!("{}{}: {}", record.service_url(), path, e)))?;
        let method = if envelope.is_some() {
            Method::POST
        } else {
            Method::GET
        };
        Ok((method, url, envelope))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        envelope: Option<&RequestEnvelope>,
    ) -> Result<(reqwest::StatusCode, Vec<u8>), FlowError> {
        tracing::debug!(
            %method,
            %url,
            encrypted = envelope.is_some_and(|e| e.is_encrypted()),
            "Dispatching to agent"
        );

        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json");
        if let Some(envelope) = envelope {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(envelope.to_wire()?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlowError::Transport(transport_reason(&e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FlowError::Transport(transport_reason(&e)))?;
        Ok((status, body.to_vec()))
    }
}

/// Race `fut` against the interrupt.
async fn interruptible<T, E, F, I>(interrupt: &mut Pin<&mut I>, fut: F) -> Result<T, FlowError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<FlowError>,
    I: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = interrupt.as_mut() => Err(FlowError::Interrupted),
        result = fut => result.map_err(Into::into),
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("could not connect: {e}")
    } else {
        e.to_string()
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.into_owned(),
    }
}

/// In-progress run bookkeeping.
struct Run {
    run_id: Uuid,
    agent_id: u64,
    state: FlowState,
    trace: Vec<FlowState>,
    started_at: DateTime<Utc>,
    record: Option<AgentRecord>,
    dispatch: Option<DispatchInfo>,
    response: Option<ResponseEnvelope>,
}

impl Run {
    fn new(agent_id: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            agent_id,
            state: FlowState::Init,
            trace: vec![FlowState::Init],
            started_at: Utc::now(),
            record: None,
            dispatch: None,
            response: None,
        }
    }

    fn enter(&mut self, state: FlowState) {
        tracing::debug!(run_id = %self.run_id, from = %self.state, to = %state, "Flow transition");
        self.state = state;
        self.trace.push(state);
    }

    fn fail(self, error: FlowError) -> FlowReport {
        tracing::error!(
            run_id = %self.run_id,
            agent_id = self.agent_id,
            state = %self.state,
            kind = error.kind(),
            "Verification flow failed: {}",
            error
        );
        let state = self.state;
        self.finish(Outcome::Failed { state, error })
    }

    fn finish(mut self, outcome: Outcome) -> FlowReport {
        let terminal = outcome.state();
        self.enter(terminal);
        match &outcome {
            Outcome::Verified => {
                tracing::info!(
                    run_id = %self.run_id,
                    agent_id = self.agent_id,
                    "Response signature verified"
                )
            }
            Outcome::Rejected => {
                tracing::warn!(
                    run_id = %self.run_id,
                    agent_id = self.agent_id,
                    "Response signature rejected"
                )
            }
            Outcome::Failed { .. } => {}
        }
        FlowReport {
            run_id: self.run_id,
            agent_id: self.agent_id,
            record: self.record,
            dispatch: self.dispatch,
            response: self.response,
            trace: self.trace,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }
}

/// Why a run ended in FAILED.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid agent endpoint: {0}")]
    Endpoint(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("interrupted")]
    Interrupted,

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FlowError {
    /// Stable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Registry(RegistryError::Unavailable(_)) => "RegistryUnavailable",
            FlowError::Registry(RegistryError::NotFound(_)) => "AgentNotFound",
            FlowError::Registry(RegistryError::Decode(_)) => "RegistryDecode",
            FlowError::Endpoint(_) => "InvalidEndpoint",
            FlowError::Transport(_) => "TransportError",
            FlowError::Envelope(EnvelopeError::MalformedResponse(_)) => "MalformedResponse",
            FlowError::Envelope(_) => "EnvelopeError",
            FlowError::Verify(VerifyError::InvalidSignatureEncoding(_)) => {
                "InvalidSignatureEncoding"
            }
            FlowError::Verify(_) => "VerificationError",
            FlowError::Interrupted => "Interrupted",
            FlowError::Client(_) => "ClientError",
        }
    }
}
