use crate::backend::BackendEndpoint;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const ALLOCATION_PATH: &str = "/model/allocation/compute";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Query parameters accepted by the allocation endpoint, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationQuery {
    pub window: Option<String>,
    pub aggregate: Option<String>,
    pub include_idle: Option<String>,
    pub step: Option<String>,
    pub accumulate: Option<String>,
}

impl AllocationQuery {
    /// Builds the query from raw pairs. The first occurrence of a repeated key
    /// wins and unknown keys are ignored.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut query = AllocationQuery::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "window" => &mut query.window,
                "aggregate" => &mut query.aggregate,
                "includeIdle" => &mut query.include_idle,
                "step" => &mut query.step,
                "accumulate" => &mut query.accumulate,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        query
    }

    /// Parameters to send upstream. Absent and empty values are left out.
    pub fn present_params(&self) -> Vec<(&'static str, &str)> {
        [
            ("window", &self.window),
            ("aggregate", &self.aggregate),
            ("includeIdle", &self.include_idle),
            ("step", &self.step),
            ("accumulate", &self.accumulate),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        })
        .collect()
    }
}

/// Retries for connection-level failures only. The wait doubles per attempt up to `max_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub count: u32,
    pub wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 0,
            wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.wait
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_wait)
    }
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// A successful backend answer: its status and the JSON object it returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub body: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid allocation backend URL: {0}")]
    InvalidTarget(#[source] url::ParseError),
    #[error("failed to reach allocation backend: {0}")]
    Connection(#[source] reqwest::Error),
    #[error("failed to parse allocation response: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("allocation backend returned {status}")]
    Backend {
        status: StatusCode,
        body: Vec<u8>,
        content_type: Option<String>,
    },
}

impl ForwardError {
    /// Status to answer the caller with. Backend failures keep the backend's own status.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Backend { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type ProxyResult = Result<ProxyResponse, ForwardError>;

pub struct Forwarder {
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl Forwarder {
    pub fn try_new(config: ForwarderConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http_client,
            retry: config.retry,
        })
    }

    pub fn try_default() -> Result<Self, reqwest::Error> {
        Self::try_new(ForwarderConfig::default())
    }

    pub fn request_url(
        backend: &BackendEndpoint,
        params: &AllocationQuery,
    ) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("http://{}{}", backend.authority(), ALLOCATION_PATH))?;

        let present = params.present_params();
        if !present.is_empty() {
            url.query_pairs_mut().extend_pairs(present);
        }

        Ok(url)
    }

    /// Issues one GET against the backend (plus configured retries) and maps the answer.
    pub async fn forward(&self, backend: &BackendEndpoint, params: &AllocationQuery) -> ProxyResult {
        let url = Self::request_url(backend, params).map_err(ForwardError::InvalidTarget)?;
        debug!("Request URL: {}", url);

        let response = self.send(url).await?;
        debug!("Response Status Code: {}", response.status());

        map_allocation_response(response).await
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response, ForwardError> {
        let mut attempt = 0;
        loop {
            match self.http_client.get(url.clone()).send().await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.retry.count => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Allocation backend unreachable ({}), retrying in {:?}",
                        err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(ForwardError::Connection(err)),
            }
        }
    }
}

// A 2XX that parses into a JSON object is a success, a 2XX that doesn't is a
// parse error, anything else is relayed as a backend error.
async fn map_allocation_response(resp: reqwest::Response) -> ProxyResult {
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = resp.bytes().await.map_err(ForwardError::Connection)?;

    if status.is_success() {
        match serde_json::from_slice::<Map<String, Value>>(&body) {
            Ok(body) => Ok(ProxyResponse { status, body }),
            Err(err) => Err(ForwardError::Parse(err)),
        }
    } else {
        Err(ForwardError::Backend {
            status,
            body: body.to_vec(),
            content_type,
        })
    }
}
