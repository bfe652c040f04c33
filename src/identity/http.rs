//! Identity management REST client.

use super::IdentityRemapper;
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct HttpIdentityRemapper {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    identifier: Option<IdentityRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord {
    #[serde(default)]
    external_ids: Vec<ExternalIdRecord>,
}

#[derive(Debug, Deserialize)]
struct ExternalIdRecord {
    id: String,
}

impl IdentityResponse {
    fn first_external_id(self) -> Option<String> {
        self.identifier?
            .external_ids
            .into_iter()
            .map(|e| e.id)
            .find(|id| !id.is_empty())
    }
}

impl HttpIdentityRemapper {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HttpIdentityRemapper")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl IdentityRemapper for HttpIdentityRemapper {
    async fn resolve_external_id(&self, fixture_id: &str) -> Result<Option<String>> {
        let url = format!("{}/identity", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("uid", fixture_id)])
            .send()
            .await
            .context("GET /identity failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(fixture_id, "identity not propagated yet");
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET /identity {}: {}", status, text));
        }

        let body = resp
            .json::<IdentityResponse>()
            .await
            .context("Failed to parse identity response")?;
        Ok(body.first_external_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_first_external_id() {
        let body: IdentityResponse = serde_json::from_str(
            r#"{"identifier":{"uid":"f-1","externalIds":[{"system":"ramp","id":"R-9"},{"system":"x","id":"X-1"}]}}"#,
        )
        .unwrap();
        assert_eq!(body.first_external_id().as_deref(), Some("R-9"));
    }

    #[test]
    fn test_empty_external_ids_is_unresolved() {
        let body: IdentityResponse =
            serde_json::from_str(r#"{"identifier":{"uid":"f-1","externalIds":[]}}"#).unwrap();
        assert!(body.first_external_id().is_none());

        let body: IdentityResponse = serde_json::from_str(r#"{"identifier":null}"#).unwrap();
        assert!(body.first_external_id().is_none());
    }
}
