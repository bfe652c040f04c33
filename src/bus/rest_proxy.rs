//! Publisher backed by the bus REST gateway.
//!
//! Records go to `POST {base}/v3/clusters/{cluster}/topics/{topic}/records`
//! with a string key, a base64 binary value and the correlation id and payload
//! type carried as record headers.

use super::{EventPublisher, OutboundMessage};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct RestProxyPublisher {
    client: Client,
    base_url: String,
    cluster_id: String,
}

#[derive(Debug, Serialize)]
struct ProduceRequest<'a> {
    key: TypedData<'a>,
    value: TypedData<'a>,
    headers: Vec<RecordHeader>,
}

#[derive(Debug, Serialize)]
struct TypedData<'a> {
    #[serde(rename = "type")]
    data_type: &'static str,
    data: Cow<'a, str>,
}

#[derive(Debug, Serialize)]
struct RecordHeader {
    name: &'static str,
    /// Header values are base64 on the gateway.
    value: String,
}

impl RecordHeader {
    fn new(name: &'static str, value: &str) -> Self {
        Self {
            name,
            value: BASE64.encode(value.as_bytes()),
        }
    }
}

impl RestProxyPublisher {
    pub fn new(base_url: &str, cluster_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build RestProxyPublisher")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cluster_id: cluster_id.to_string(),
        })
    }

    fn records_url(&self, topic: &str) -> String {
        format!(
            "{}/v3/clusters/{}/topics/{}/records",
            self.base_url, self.cluster_id, topic
        )
    }
}

/// MIME type carried in the `content_type` record header; the event's type
/// tag travels separately in `payload_type`.
const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

fn produce_request(message: &OutboundMessage) -> ProduceRequest<'_> {
    ProduceRequest {
        key: TypedData {
            data_type: "STRING",
            data: message.key.as_str().into(),
        },
        value: TypedData {
            data_type: "BINARY",
            data: BASE64.encode(&message.payload).into(),
        },
        headers: vec![
            RecordHeader::new("correlation_id", &message.correlation_id),
            RecordHeader::new("content_type", PROTOBUF_CONTENT_TYPE),
            RecordHeader::new("payload_type", message.payload_type),
        ],
    }
}

#[async_trait::async_trait]
impl EventPublisher for RestProxyPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        let url = self.records_url(&message.topic);
        let body = produce_request(message);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("POST {} {}: {}", url, status, text));
        }

        debug!(
            topic = %message.topic,
            key = %message.key,
            correlation_id = %message.correlation_id,
            "📤 Published {}",
            message.payload_type
        );
        Ok(())
    }
}
