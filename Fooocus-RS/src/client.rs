use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{FooocusError, Result};
use crate::types::*;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Async client for a Fooocus-API server instance.
///
/// Every call carries a per-request timeout. The client never retries on
/// its own; retry policy belongs to the caller.
///
/// # Example
/// ```no_run
/// use fooocus_rs::{FooocusClient, JobPayload, TextToImageParams};
///
/// # async fn example() -> fooocus_rs::Result<()> {
/// let client = FooocusClient::new("http://127.0.0.1:8888");
/// if client.is_up().await {
///     let job = client
///         .submit(&JobPayload::TextToImage(TextToImageParams::new("a lighthouse")))
///         .await?;
///     let snapshot = client.query_job(&job.job_id).await;
///     println!("{} {:.0}%", snapshot.stage, snapshot.progress * 100.0);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FooocusClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl FooocusClient {
    /// Create a new client pointing at the given Fooocus-API endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Set the timeout applied to submit, status and download calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Port of the configured endpoint, if one can be determined.
    pub fn port(&self) -> Option<u16> {
        reqwest::Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.port_or_known_default())
    }

    fn unreachable(&self, e: reqwest::Error) -> FooocusError {
        FooocusError::Network {
            context: format!(
                "Cannot connect to Fooocus-API at {} (is the service running?)",
                self.endpoint
            ),
            source: e,
        }
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Probe `/ping`. Errors only on transport failure.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/ping", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(resp.status().is_success())
    }

    /// Bounded health probe that folds every failure into `false`.
    pub async fn is_up(&self) -> bool {
        self.health().await.unwrap_or(false)
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Submit a job in async mode. Returns the backend-assigned job id.
    pub async fn submit(&self, payload: &JobPayload) -> Result<SubmittedJob> {
        match payload {
            JobPayload::TextToImage(params) => {
                self.post_job("/v1/generation/text-to-image", params).await
            }
            JobPayload::Variation(params) => {
                self.post_job("/v2/generation/image-upscale-vary", params)
                    .await
            }
        }
    }

    async fn post_job<T: Serialize>(&self, path: &str, body: &T) -> Result<SubmittedJob> {
        let url = format!("{}{}", self.endpoint, path);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(FooocusError::Http {
                status,
                body: body_text,
            });
        }

        let json: Value = resp.json().await.map_err(|e| FooocusError::Network {
            context: format!("Failed to parse Fooocus-API {} response", path),
            source: e,
        })?;

        parse_submission(&json)
    }

    // ── Status ──────────────────────────────────────────────────────

    /// Fetch the current state of a job.
    ///
    /// Never returns an error: transport failures, non-2xx responses and
    /// unparseable bodies come back as a transient ERROR snapshot.
    pub async fn query_job(&self, job_id: &str) -> JobSnapshot {
        match self.try_query_job(job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => JobSnapshot::transient_failure(job_id, e.to_string()),
        }
    }

    async fn try_query_job(&self, job_id: &str) -> Result<JobSnapshot> {
        let url = format!("{}/v1/generation/query-job", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .query(&[("job_id", job_id), ("require_step_preview", "false")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FooocusError::Network {
                context: format!("Failed to query Fooocus-API job {}", job_id),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FooocusError::Http { status, body });
        }

        let json: Value = resp.json().await.map_err(|e| FooocusError::Network {
            context: "Failed to parse Fooocus-API query-job response".into(),
            source: e,
        })?;
        Ok(JobSnapshot::from_json(job_id, &json))
    }

    // ── Image download ──────────────────────────────────────────────

    /// Resolve a result URL against the endpoint when it is relative.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.endpoint, url.trim_start_matches('/'))
        }
    }

    /// Get the raw bytes of a generated image, decoding inline base64 when
    /// present and downloading the URL otherwise.
    pub async fn image_bytes(&self, image: &GeneratedImage) -> Result<Vec<u8>> {
        if let Some(b64) = image.base64.as_deref() {
            let data = b64.rsplit_once(',').map(|(_, d)| d).unwrap_or(b64);
            return base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| FooocusError::InvalidResponse(format!("Bad inline image: {}", e)));
        }

        let url = image
            .url
            .as_deref()
            .map(|u| self.resolve_url(u))
            .ok_or_else(|| FooocusError::InvalidResponse("Image has neither url nor data".into()))?;

        let resp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FooocusError::Network {
                context: format!("Failed to fetch image {}", url),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Err(FooocusError::Http {
                status: resp.status().as_u16(),
                body: format!("Failed to fetch image {}", url),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| FooocusError::Network {
            context: "Failed to read image bytes".into(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Ask the backend to interrupt the task it is currently running.
    pub async fn stop_generation(&self) -> Result<()> {
        let url = format!("{}/v1/generation/stop", self.endpoint);
        self.http
            .post(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| FooocusError::Network {
                context: "Failed to send stop request".into(),
                source: e,
            })?;
        Ok(())
    }
}

fn parse_submission(json: &Value) -> Result<SubmittedJob> {
    // Sync-mode responses are arrays; async mode must return an object.
    let job_id = json
        .get("job_id")
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| FooocusError::InvalidResponse("Response missing job_id".into()))?;

    let stage = json
        .get("job_stage")
        .and_then(|v| v.as_str())
        .and_then(JobStage::parse)
        .unwrap_or(JobStage::Pending);

    Ok(SubmittedJob { job_id, stage })
}
