use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::cameras::CameraConfig;

/// Read side of the control-plane API consumed by the relay fleet.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the configured camera roster.
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>>;

    /// Requests an ingest URL for one camera and its detected codec.
    ///
    /// The control plane may rotate destinations between calls, so the
    /// result must be fetched per relay attempt and never cached.
    async fn stream_url(&self, camera_id: &str, codec: &str) -> Result<String>;
}

/// HTTP client for the control-plane API.
#[derive(Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    bearer: String,
    client: Client,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>, bearer: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building control-plane http client")?;
        Ok(Self {
            base_url,
            bearer: bearer.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Deserialize)]
struct CameraListResponse {
    ipcam: Vec<CameraConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamUrlResponse {
    stream_url: String,
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>> {
        let response = self
            .client
            .get(self.url("/api/ipcam"))
            .bearer_auth(&self.bearer)
            .send()
            .await
            .context("requesting camera roster")?
            .error_for_status()
            .context("camera roster request rejected")?;

        let body = response
            .json::<CameraListResponse>()
            .await
            .context("decoding camera roster")?;
        Ok(body.ipcam)
    }

    async fn stream_url(&self, camera_id: &str, codec: &str) -> Result<String> {
        debug!(%camera_id, %codec, "requesting stream url");
        let response = self
            .client
            .get(self.url("/api/stream"))
            .query(&[("id", camera_id), ("codec", codec)])
            .bearer_auth(&self.bearer)
            .send()
            .await
            .with_context(|| format!("requesting stream url for camera {camera_id}"))?
            .error_for_status()
            .with_context(|| format!("stream url request rejected for camera {camera_id}"))?;

        let body = response
            .json::<StreamUrlResponse>()
            .await
            .context("decoding stream url response")?;
        Ok(body.stream_url)
    }
}
