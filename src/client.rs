//! HTTP Client for the reputation API
//!
//! Thin typed wrapper over the service endpoints, authenticating with an
//! `APIKey` token.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::reputation::{Reputation, Violation, ViolationRequest};

/// Request timeout applied to every call
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of `/__version__`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub build: String,
}

#[derive(Debug, Clone)]
pub struct ReputationClient {
    base_url: Url,
    token: String,
    http_client: Client,
}

impl ReputationClient {
    pub fn new(url: &str, token: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(anyhow::anyhow!("Reputation service url is required"));
        }
        if token.is_empty() {
            return Err(anyhow::anyhow!("Reputation service token is required"));
        }
        let base_url = Url::parse(url).context("Invalid reputation service url")?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("Reputation service url cannot be a base: {}", url));
        }

        let http_client = Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .user_agent(concat!("iprepd-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            token: token.to_string(),
            http_client,
        })
    }

    /// Build an endpoint url; segments are percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Reputation service url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("APIKey {}", self.token))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("Failed to {}", what))?;
        debug!(status = %resp.status(), "{}", what);
        Ok(resp)
    }

    fn expect_ok(resp: &Response, what: &str) -> Result<()> {
        if resp.status() != StatusCode::OK {
            return Err(anyhow::anyhow!(
                "{} returned status {}",
                what,
                resp.status()
            ));
        }
        Ok(())
    }

    /// `true` when the service and its store are reachable
    pub async fn heartbeat(&self) -> Result<bool> {
        let url = self.endpoint(&["__heartbeat__"])?;
        match self.http_client.get(url).send().await {
            Ok(resp) => Ok(resp.status() == StatusCode::OK),
            Err(e) => {
                warn!("Heartbeat failed: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn lb_heartbeat(&self) -> Result<bool> {
        let url = self.endpoint(&["__lbheartbeat__"])?;
        match self.http_client.get(url).send().await {
            Ok(resp) => Ok(resp.status() == StatusCode::OK),
            Err(e) => {
                warn!("LB heartbeat failed: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        let url = self.endpoint(&["__version__"])?;
        let resp = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to get version")?;
        Self::expect_ok(&resp, "version")?;
        resp.json().await.context("Failed to parse version response")
    }

    /// Current reputation, `None` when the object has no entry
    pub async fn get_reputation(&self, object_type: &str, object: &str) -> Result<Option<Reputation>> {
        let url = self.endpoint(&["type", object_type, object])?;
        let resp = self
            .send(self.http_client.get(url), "get reputation")
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_ok(&resp, "get reputation")?;
        let reputation = resp
            .json()
            .await
            .context("Failed to parse reputation response")?;
        Ok(Some(reputation))
    }

    pub async fn set_reputation(&self, reputation: &Reputation) -> Result<()> {
        if reputation.object.is_empty() || reputation.object_type.is_empty() {
            return Err(anyhow::anyhow!("Reputation object and type are required"));
        }
        let url = self.endpoint(&["type", &reputation.object_type, &reputation.object])?;
        let resp = self
            .send(self.http_client.put(url).json(reputation), "set reputation")
            .await?;
        Self::expect_ok(&resp, "set reputation")
    }

    pub async fn delete_reputation(&self, object_type: &str, object: &str) -> Result<()> {
        let url = self.endpoint(&["type", object_type, object])?;
        let resp = self
            .send(self.http_client.delete(url), "delete reputation")
            .await?;
        Self::expect_ok(&resp, "delete reputation")
    }

    /// Apply one violation; `object_type` and `object` come from the request
    pub async fn apply_violation(&self, request: &ViolationRequest) -> Result<()> {
        if request.object.is_empty() || request.object_type.is_empty() {
            return Err(anyhow::anyhow!("Violation object and type are required"));
        }
        let url = self.endpoint(&["violations", "type", &request.object_type, &request.object])?;
        let resp = self
            .send(self.http_client.put(url).json(request), "apply violation")
            .await?;
        Self::expect_ok(&resp, "apply violation")
    }

    pub async fn apply_violations(
        &self,
        object_type: &str,
        requests: &[ViolationRequest],
    ) -> Result<()> {
        let url = self.endpoint(&["violations", "type", object_type])?;
        let resp = self
            .send(self.http_client.put(url).json(requests), "apply violations")
            .await?;
        Self::expect_ok(&resp, "apply violations")
    }

    pub async fn get_violations(&self) -> Result<Vec<Violation>> {
        let url = self.endpoint(&["violations"])?;
        let resp = self
            .send(self.http_client.get(url), "get violations")
            .await?;
        Self::expect_ok(&resp, "get violations")?;
        resp.json()
            .await
            .context("Failed to parse violations response")
    }

    pub async fn dump(&self) -> Result<Vec<Reputation>> {
        let url = self.endpoint(&["dump"])?;
        let resp = self.send(self.http_client.get(url), "dump").await?;
        Self::expect_ok(&resp, "dump")?;
        resp.json().await.context("Failed to parse dump response")
    }
}
