use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::retry::{RetryError, RetryPolicy};
use crate::transfer::{TransferClient, TransferError};

pub const DEFAULT_BASE_URL: &str = "https://flirconservator.com/";
const GRAPHQL_PATH: &str = "/graphql";

const SERVER_REJECTED: &str = "Server rejected query";
const INVALID_RESPONSE: &str = "Invalid server response";

/// Failures that never reached a well-formed GraphQL response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConservatorError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{message} (status {status}): {body}")]
    Server {
        status: StatusCode,
        message: String,
        body: String,
    },
    #[error("request cancelled")]
    Cancelled,
    #[error("no object with id {0}")]
    UnknownId(String),
    #[error("response missing field `{0}`")]
    MissingField(String),
    #[error("unexpected response shape: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl ConservatorError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ConservatorError::Transport(_))
    }

    pub fn is_server_rejection(&self) -> bool {
        matches!(self, ConservatorError::Server { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ConservatorError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

struct RawResponse {
    status: StatusCode,
    body: String,
    payload: Value,
}

#[derive(Clone)]
pub struct ConservatorClient {
    http: Client,
    base_url: Url,
    endpoint: Url,
    token: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    transfer: TransferClient,
}

impl ConservatorClient {
    pub fn new(token: impl Into<String>) -> Result<Self, ConservatorError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, ConservatorError> {
        let base_url = Url::parse(base_url)?;
        let http = Client::new();
        Ok(Self {
            endpoint: base_url.join(GRAPHQL_PATH)?,
            transfer: TransferClient::with_http(http.clone(), base_url.clone()),
            http,
            base_url,
            token: token.into(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ties every request made by this client to `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn transfer(&self) -> &TransferClient {
        &self.transfer
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends one GraphQL operation and returns the `data` object.
    ///
    /// Transport failures (connection errors, timeouts, bodies that are not
    /// JSON) are retried according to the retry policy. A parsed response that
    /// reports `errors`, or carries neither `errors` nor `data`, is returned as
    /// [`ConservatorError::Server`] on the first attempt.
    pub async fn query(&self, document: &str, variables: Value) -> Result<Value, ConservatorError> {
        let request = GraphQlRequest {
            query: document,
            variables: &variables,
        };
        let request = &request;
        let raw = self
            .retry
            .run(&self.cancel, move |attempt| {
                tracing::debug!(attempt, endpoint = %self.endpoint, "graphql request");
                self.send_once(request)
            })
            .await
            .map_err(|err| match err {
                RetryError::Cancelled => ConservatorError::Cancelled,
                RetryError::Exhausted(err) => ConservatorError::Transport(err),
            })?;
        interpret(raw)
    }

    /// Like [`query`](Self::query), unwrapping and decoding one key of `data`.
    pub async fn query_field<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: Value,
        field: &str,
    ) -> Result<T, ConservatorError> {
        let mut data = self.query(document, variables).await?;
        let value = data
            .get_mut(field)
            .map(Value::take)
            .ok_or_else(|| ConservatorError::MissingField(field.to_string()))?;
        serde_json::from_value(value).map_err(ConservatorError::Decode)
    }

    async fn send_once(&self, request: &GraphQlRequest<'_>) -> Result<RawResponse, TransportError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, self.token.as_str())
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let payload = serde_json::from_str(&body)?;
        Ok(RawResponse {
            status,
            body,
            payload,
        })
    }
}

fn interpret(raw: RawResponse) -> Result<Value, ConservatorError> {
    let RawResponse {
        status,
        body,
        mut payload,
    } = raw;
    if has_errors(&payload) {
        return Err(ConservatorError::Server {
            status,
            message: SERVER_REJECTED.to_string(),
            body,
        });
    }
    match payload.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(ConservatorError::Server {
            status,
            message: INVALID_RESPONSE.to_string(),
            body,
        }),
    }
}

fn has_errors(payload: &Value) -> bool {
    match payload.get("errors") {
        None | Some(Value::Null) => false,
        Some(Value::Array(errors)) => !errors.is_empty(),
        Some(_) => true,
    }
}
