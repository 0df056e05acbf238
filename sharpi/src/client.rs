//! Create-or-update client for the partner API.
//!
//! The API only offers strict create (POST) and update (PATCH) operations and answers a
//! create for an existing natural key with a 400 "duplicate key" error. [`UpsertClient`]
//! turns that rejection into an update of the existing resource.

use crate::config::Config;
use crate::metrics_defs::{DUPLICATES_PATCHED, HTTP_REQUEST_DURATION, HTTP_REQUESTS};
use crate::retry::{Retriable, RetryPolicy, RetryState, with_backoff};
use crate::types::{CanonicalRecord, EntityKind, NaturalKey};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use url::Url;

const API_KEY_HEADER: &str = "X-API-Key";
const DUPLICATE_MARKERS: &[&str] = &["duplicate key", "already exists"];

#[derive(thiserror::Error, Debug)]
pub enum UpsertError {
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("base url {0} cannot hold resource paths")]
    InvalidBaseUrl(String),
    #[error("{method} {url} rejected with {status}: {body}")]
    Rejected {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("update of {url} reported a conflict: {message}")]
    ConflictOnUpdate { url: String, message: String },
    #[error("{kind} record already exists but its key {key} is incomplete")]
    IncompleteKey { kind: EntityKind, key: String },
    #[error("{method} {url} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: Method,
        url: String,
        attempts: u32,
        last: String,
    },
}

/// How a record ended up on the partner side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

impl Upserted {
    pub const fn as_str(self) -> &'static str {
        match self {
            Upserted::Created => "created",
            Upserted::Updated => "updated",
        }
    }
}

/// Classification of a single HTTP attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestOutcome {
    Accepted,
    DuplicateConflict(String),
    ClientError { status: StatusCode, body: String },
    ServerError { status: StatusCode, body: String },
    /// The request never produced a response: connection refused, timeout, reset.
    Transport(String),
}

impl RequestOutcome {
    fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Accepted => "accepted",
            RequestOutcome::DuplicateConflict(_) => "duplicate",
            RequestOutcome::ClientError { .. } => "client_error",
            RequestOutcome::ServerError { .. } => "server_error",
            RequestOutcome::Transport(_) => "transport_error",
        }
    }
}

impl Retriable for RequestOutcome {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            RequestOutcome::ServerError { .. } | RequestOutcome::Transport(_)
        )
    }
}

/// Classifies a response by status and body.
pub fn classify(status: StatusCode, body: &str) -> RequestOutcome {
    if status.is_success() {
        return RequestOutcome::Accepted;
    }

    if status == StatusCode::BAD_REQUEST {
        let message = error_message(body);
        let lowered = message.to_lowercase();
        if DUPLICATE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return RequestOutcome::DuplicateConflict(message);
        }
    }

    let body = body.to_string();
    if status.is_server_error() {
        RequestOutcome::ServerError { status, body }
    } else {
        RequestOutcome::ClientError { status, body }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<ErrorMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

/// The `message` of a JSON error body, or the raw body when there is none.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(ErrorMessage::One(message)),
        }) => message,
        Ok(ErrorBody {
            message: Some(ErrorMessage::Many(messages)),
        }) => messages.join("; "),
        _ => body.to_string(),
    }
}

enum CreateError {
    /// The resource exists already and has to be updated instead.
    NeedsUpdate(String),
    Fatal(UpsertError),
}

pub struct UpsertClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl UpsertClient {
    pub fn new(config: &Config) -> Result<Self, UpsertError> {
        if config.base_url.cannot_be_a_base() {
            return Err(UpsertError::InvalidBaseUrl(config.base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(UpsertClient {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::from(&config.retry),
        })
    }

    /// Writes `record`, creating it or, when its key already exists, updating it.
    pub async fn send(
        &self,
        kind: EntityKind,
        record: &CanonicalRecord,
        key: &NaturalKey,
    ) -> Result<Upserted, UpsertError> {
        match self.create(kind, record).await {
            Ok(()) => Ok(Upserted::Created),
            Err(CreateError::NeedsUpdate(message)) => {
                tracing::warn!(
                    stream = %kind,
                    key = %key,
                    reason = %message,
                    "duplicate record, updating the existing one"
                );
                counter!(DUPLICATES_PATCHED, "stream" => kind.endpoint()).increment(1);
                self.update(kind, record, key).await?;
                tracing::info!(stream = %kind, key = %key, "patch applied");
                Ok(Upserted::Updated)
            }
            Err(CreateError::Fatal(e)) => Err(e),
        }
    }

    async fn create(&self, kind: EntityKind, record: &CanonicalRecord) -> Result<(), CreateError> {
        let url = self.url(kind, &[]).map_err(CreateError::Fatal)?;
        let (outcome, state) = self.dispatch(Method::POST, &url, record).await;

        match outcome {
            RequestOutcome::DuplicateConflict(message) => Err(CreateError::NeedsUpdate(message)),
            other => settle(Method::POST, &url, other, state).map_err(CreateError::Fatal),
        }
    }

    async fn update(
        &self,
        kind: EntityKind,
        record: &CanonicalRecord,
        key: &NaturalKey,
    ) -> Result<(), UpsertError> {
        let segments = key.segments().ok_or_else(|| UpsertError::IncompleteKey {
            kind,
            key: key.to_string(),
        })?;
        let url = self.url(kind, &segments)?;
        let (outcome, state) = self.dispatch(Method::PATCH, &url, record).await;

        // A conflict on the update itself is not retried as anything else.
        settle(Method::PATCH, &url, outcome, state)
    }

    /// `{base}/{endpoint}/{segments...}`, each segment percent-encoded.
    fn url(&self, kind: EntityKind, segments: &[&str]) -> Result<Url, UpsertError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| UpsertError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(kind.endpoint())
            .extend(segments);
        Ok(url)
    }

    async fn dispatch(
        &self,
        method: Method,
        url: &Url,
        record: &CanonicalRecord,
    ) -> (RequestOutcome, RetryState) {
        with_backoff(&self.retry, || self.attempt(method.clone(), url, record)).await
    }

    async fn attempt(&self, method: Method, url: &Url, record: &CanonicalRecord) -> RequestOutcome {
        let started = Instant::now();
        tracing::info!(%method, %url, "making request");
        tracing::debug!(payload = ?record, "request data");

        let result = self
            .client
            .request(method.clone(), url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(record)
            .send()
            .await;

        let outcome = match result {
            Ok(response) => {
                let status = response.status();
                tracing::info!(status = status.as_u16(), "response status");
                match response.text().await {
                    Ok(body) => {
                        tracing::debug!(%body, "response body");
                        classify(status, &body)
                    }
                    Err(e) => RequestOutcome::Transport(e.to_string()),
                }
            }
            Err(e) => {
                tracing::warn!(%method, %url, error = %e, "request failed");
                RequestOutcome::Transport(e.to_string())
            }
        };

        histogram!(HTTP_REQUEST_DURATION, "method" => method.to_string())
            .record(started.elapsed().as_secs_f64());
        counter!(HTTP_REQUESTS, "method" => method.to_string(), "outcome" => outcome.label())
            .increment(1);

        outcome
    }
}

/// Converts the final outcome of a retried exchange into the call's result.
fn settle(
    method: Method,
    url: &Url,
    outcome: RequestOutcome,
    state: RetryState,
) -> Result<(), UpsertError> {
    match outcome {
        RequestOutcome::Accepted => Ok(()),
        RequestOutcome::DuplicateConflict(message) => Err(UpsertError::ConflictOnUpdate {
            url: url.to_string(),
            message,
        }),
        RequestOutcome::ClientError { status, body } => Err(UpsertError::Rejected {
            method,
            url: url.to_string(),
            status,
            body,
        }),
        RequestOutcome::ServerError { status, body } => {
            exhausted(method, url, state, format!("{status}: {body}"))
        }
        RequestOutcome::Transport(message) => exhausted(method, url, state, message),
    }
}

fn exhausted(
    method: Method,
    url: &Url,
    state: RetryState,
    last: String,
) -> Result<(), UpsertError> {
    tracing::error!(
        %method,
        %url,
        attempts = state.attempts(),
        elapsed_ms = state.elapsed().as_millis() as u64,
        last = %last,
        "retry budget exhausted"
    );
    Err(UpsertError::RetriesExhausted {
        method,
        url: url.to_string(),
        attempts: state.attempts(),
        last,
    })
}
