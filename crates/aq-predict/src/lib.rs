//! Client for the academIQ prediction backend.
//!
//! The backend exposes two endpoints:
//! - `POST /ingest` takes the sanitized snapshot export and returns derived
//!   `features`
//! - `POST /predict` takes those features and returns a risk assessment
//!
//! Field names match the backend schema exactly; dashboards render them as-is.

use std::fmt;
use std::time::Duration;

use aq_core::SanitizedExport;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default request timeout for backend calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Prediction client errors.
#[derive(Debug, Error)]
pub enum PredictError {
    /// The configured backend URL is unusable.
    #[error("invalid backend URL: {reason}")]
    InvalidBaseUrl { reason: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Backend returned an error response.
    #[error("backend error: {message}")]
    Api { message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Risk assessment as returned by `/predict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub risk_cluster: i64,
    pub risk_level: String,
    pub recommendation: String,
}

/// Backend client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty, unparseable or not HTTP(S), or if
    /// the HTTP client fails to build.
    pub fn new(base_url: &str) -> Result<Self, PredictError> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            return Err(PredictError::InvalidBaseUrl {
                reason: "URL cannot be empty".to_string(),
            });
        }
        // Keep any path prefix when joining endpoint names.
        let with_slash = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        let base_url = Url::parse(&with_slash).map_err(|err| PredictError::InvalidBaseUrl {
            reason: err.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(PredictError::InvalidBaseUrl {
                reason: format!("unsupported scheme {}", base_url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(PredictError::ClientBuild)?;

        Ok(Self { http, base_url })
    }

    /// Sends the export to `/ingest` and returns the derived features.
    pub async fn ingest(&self, export: &SanitizedExport) -> Result<Map<String, Value>, PredictError> {
        let body = self.post("ingest", export).await?;
        parse_features(&body)
    }

    /// Sends features to `/predict`.
    pub async fn predict(&self, features: &Map<String, Value>) -> Result<Prediction, PredictError> {
        let body = self.post("predict", features).await?;
        parse_prediction(&body)
    }

    /// Runs the full `/ingest` then `/predict` exchange.
    pub async fn assess(&self, export: &SanitizedExport) -> Result<Prediction, PredictError> {
        let features = self.ingest(export).await?;
        tracing::debug!(features = features.len(), "backend derived features");
        self.predict(&features).await
    }

    fn endpoint(&self, name: &str) -> Result<Url, PredictError> {
        self.base_url
            .join(name)
            .map_err(|err| PredictError::InvalidBaseUrl {
                reason: err.to_string(),
            })
    }

    async fn post<T: Serialize + ?Sized>(&self, name: &str, body: &T) -> Result<String, PredictError> {
        let url = self.endpoint(name)?;
        tracing::debug!(%url, "posting to backend");
        let response = self.http.post(url).json(body).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(parse_api_error(&body).unwrap_or_else(|| PredictError::Api {
                message: format!("status {status}: {body}"),
            }));
        }
        Ok(body)
    }
}

/// Label for a risk cluster when the backend does not send one.
pub fn risk_level_for_cluster(cluster: i64) -> &'static str {
    match cluster {
        0 => "Low",
        1 => "Medium",
        2 => "High",
        _ => "Unknown",
    }
}

fn parse_features(body: &str) -> Result<Map<String, Value>, PredictError> {
    #[derive(Deserialize)]
    struct IngestResponse {
        features: Option<Map<String, Value>>,
    }

    let payload: IngestResponse = serde_json::from_str(body)
        .map_err(|err| PredictError::InvalidResponse(err.to_string()))?;
    payload
        .features
        .ok_or_else(|| PredictError::InvalidResponse("missing features".to_string()))
}

fn parse_prediction(body: &str) -> Result<Prediction, PredictError> {
    #[derive(Deserialize)]
    struct PredictResponse {
        risk_cluster: i64,
        risk_level: Option<String>,
        recommendation: Option<String>,
    }

    let payload: PredictResponse = serde_json::from_str(body)
        .map_err(|err| PredictError::InvalidResponse(err.to_string()))?;
    let risk_level = payload
        .risk_level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| risk_level_for_cluster(payload.risk_cluster).to_string());
    Ok(Prediction {
        risk_cluster: payload.risk_cluster,
        risk_level,
        recommendation: payload.recommendation.unwrap_or_default(),
    })
}

fn parse_api_error(body: &str) -> Option<PredictError> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        detail: Value,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .map(|payload| PredictError::Api {
            message: match payload.detail {
                Value::String(message) => message,
                other => other.to_string(),
            },
        })
}
