//! Health endpoint probing.
//!
//! A probe is a single `GET` against an instance's health endpoint. Success
//! is any 2xx answered within the probe timeout; the body is carried along
//! but never interpreted.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Answer from a health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl ProbeResponse {
    /// Any 2xx counts as healthy.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Probe a health endpoint once.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Issue one request. Transport failures surface as
    /// `RuntimeError::ProbeTimeout` or `RuntimeError::Unreachable`.
    async fn probe(&self, url: &str) -> RuntimeResult<ProbeResponse>;
}

/// Bodies are truncated to this many bytes before being recorded.
const MAX_BODY_BYTES: usize = 2048;

/// HTTP probe with a fixed connect/read timeout.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Build a probe whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> RuntimeResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| RuntimeError::Unreachable {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_BODY_BYTES {
        let mut cut = MAX_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> RuntimeResult<ProbeResponse> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                RuntimeError::ProbeTimeout {
                    url: url.to_string(),
                }
            } else {
                RuntimeError::Unreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        // The body is opaque; a failed read only loses the body.
        let body = response.text().await.ok().map(truncate_body);
        Ok(ProbeResponse { status, body })
    }
}
