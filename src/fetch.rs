use crate::conditional::parse_http_date;
use crate::ProxyError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, Client};
use std::time::Duration;
use time::OffsetDateTime;

/// Body of an upstream response, delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, ProxyError>>;

/// Best-effort facts about the source resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginMetadata {
    pub last_modified: OffsetDateTime,
}

impl OriginMetadata {
    pub fn now() -> Self {
        Self { last_modified: OffsetDateTime::now_utc() }
    }
}

/// Where source images come from.
#[async_trait::async_trait]
pub trait Origin: Send + Sync {
    /// Never fails: anything short of a usable `Last-Modified` yields "now".
    async fn fetch_metadata(&self, url: &str) -> OriginMetadata;

    /// Opens the body stream. Errors here are fatal for the request.
    async fn fetch_stream(&self, url: &str) -> Result<ByteStream, ProxyError>;
}

/// [`Origin`] over HTTP(S) with one shared, timeout-bounded client.
#[derive(Clone)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    /// # Errors
    /// Fails only if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Origin for HttpOrigin {
    async fn fetch_metadata(&self, url: &str) -> OriginMetadata {
        let resp = match self.client.head(url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::debug!("HEAD {} returned {}, using current time", url, resp.status());
                return OriginMetadata::now();
            }
            Err(e) => {
                tracing::debug!("HEAD {} failed, using current time: {}", url, e);
                return OriginMetadata::now();
            }
        };

        resp.headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .map(|last_modified| OriginMetadata { last_modified })
            .unwrap_or_else(OriginMetadata::now)
    }

    async fn fetch_stream(&self, url: &str) -> Result<ByteStream, ProxyError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProxyError::UpstreamFetch(format!("Upstream status: {}", resp.status())));
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProxyError::UpstreamFetch(e.to_string())))
            .boxed())
    }
}
