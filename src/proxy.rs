//! Upstream round-trip for rules carrying a proxy descriptor.

use crate::config::ProxyConfig;
use crate::error::ResponseError;
use crate::snapshot::RequestSnapshot;
use async_trait::async_trait;
use hyper::HeaderMap;
use reqwest::{Client, Method};
use tracing::{debug, warn};

/// What came back from the upstream.
#[derive(Debug, Clone, Default)]
pub struct UpstreamReply {
    pub status: u16,
    pub headers: HeaderMap,
    /// `None` when the body could not be read
    pub body: Option<String>,
}

/// Something that can answer a proxied request.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send the captured request to the upstream described by `proxy`.
    async fn forward(
        &self,
        proxy: &ProxyConfig,
        snapshot: &RequestSnapshot,
    ) -> Result<UpstreamReply, ResponseError>;
}

/// HTTP upstream backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    /// Build the shared client.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(
        &self,
        proxy: &ProxyConfig,
        snapshot: &RequestSnapshot,
    ) -> Result<UpstreamReply, ResponseError> {
        let url = proxy.target_url(&snapshot.path, snapshot.raw_query.as_deref());
        let fail = |reason: String| ResponseError::Proxy {
            url: url.clone(),
            reason,
        };

        let method = Method::from_bytes(snapshot.method.as_bytes()).map_err(|e| fail(e.to_string()))?;

        let mut request = self
            .client
            .request(method, &url)
            .header("X-Forwarded-For", &snapshot.remote_addr)
            .header("X-Forwarded-Proto", "http")
            .header("X-Forwarded-Host", &snapshot.host)
            .header("X-Forwarded-Method", &snapshot.method);

        for name in &proxy.forward_headers {
            if let Some(values) = snapshot
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
            {
                for value in values {
                    request = request.header(name.as_str(), value.as_str());
                }
            }
        }

        if proxy.preserve_host && !snapshot.host.is_empty() {
            request = request.header(reqwest::header::HOST, &snapshot.host);
        }
        if !proxy.timeout.is_zero() {
            request = request.timeout(proxy.timeout);
        }
        if !snapshot.body.is_empty() {
            request = request.body(snapshot.body.clone());
        }

        debug!(url = %url, method = %snapshot.method, "Forwarding request upstream");

        let response = request.send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let body = match response.text().await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read upstream body, keeping request body");
                None
            }
        };

        Ok(UpstreamReply {
            status,
            headers,
            body,
        })
    }
}
