//! Response synthesis.
//!
//! Turns a matched rule (or the default response), the captured request and
//! the current per-path hit count into a complete HTTP response. Steps run
//! in a fixed order: template selection, error cadence, upstream proxy,
//! status, delay, headers, body resolution, envelope.

use crate::config::{ProxyConfig, ResponseTemplate, RuleDefinition};
use crate::error::ResponseError;
use crate::proxy::{Upstream, UpstreamReply};
use crate::snapshot::RequestSnapshot;
use crate::template::TemplateEngine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resolved response body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyPayload {
    /// No body configured: echo the request snapshot
    Echo,
    /// Text that is not valid JSON, written verbatim
    Literal(String),
    /// Parsed JSON value
    Structured(Value),
}

impl BodyPayload {
    /// Classify configured or rendered body text.
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => BodyPayload::Structured(value),
            Err(_) => BodyPayload::Literal(text),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    request: &'a RequestSnapshot,
    response: Value,
    status: u16,
}

/// Builds responses for the core request path.
pub struct ResponseSynthesizer {
    default_response: ResponseTemplate,
    templates: TemplateEngine,
    upstream: Arc<dyn Upstream>,
}

impl ResponseSynthesizer {
    /// Create a synthesizer with the response used when no rule matches.
    pub fn new(default_response: ResponseTemplate, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            default_response,
            templates: TemplateEngine::new(),
            upstream,
        }
    }

    /// The response used when no rule matches.
    pub fn default_response(&self) -> &ResponseTemplate {
        &self.default_response
    }

    /// Build the response for one request.
    ///
    /// `path_count` must already include the current request.
    pub async fn build(
        &self,
        mut snapshot: RequestSnapshot,
        rule: Option<&RuleDefinition>,
        path_count: u64,
    ) -> Result<Response<Full<Bytes>>, ResponseError> {
        let active = self.select_template(rule, path_count);

        let upstream = match rule.and_then(|r| r.proxy.as_ref()) {
            Some(proxy) => {
                let reply = self.forward(proxy, &snapshot).await?;
                if let Some(body) = &reply.body {
                    snapshot.body = body.clone();
                }
                Some((proxy, reply))
            }
            None => None,
        };

        let status = StatusCode::from_u16(active.status()).unwrap_or(StatusCode::OK);

        if !active.delay.is_zero() {
            tokio::time::sleep(active.delay).await;
        }

        let mut headers = template_headers(active);
        if let Some((proxy, reply)) = &upstream {
            copy_upstream_headers(proxy, reply, &mut headers);
        }
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let payload = self.resolve_body(active, &snapshot)?;
        let body = encode(payload, &snapshot, status, active.include_request)?;

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn select_template<'a>(
        &'a self,
        rule: Option<&'a RuleDefinition>,
        path_count: u64,
    ) -> &'a ResponseTemplate {
        let Some(rule) = rule else {
            return &self.default_response;
        };
        match rule.error_response.as_ref().filter(|_| rule.error_due(path_count)) {
            Some(error_response) => {
                info!(
                    rule = %rule.label(),
                    count = path_count,
                    every = rule.error_every,
                    "Error response triggered"
                );
                error_response
            }
            None => &rule.response,
        }
    }

    async fn forward(
        &self,
        proxy: &ProxyConfig,
        snapshot: &RequestSnapshot,
    ) -> Result<UpstreamReply, ResponseError> {
        self.upstream.forward(proxy, snapshot).await.map_err(|e| {
            error!(url = %proxy.url, error = %e, "Proxy request failed");
            e
        })
    }

    fn resolve_body(
        &self,
        active: &ResponseTemplate,
        snapshot: &RequestSnapshot,
    ) -> Result<BodyPayload, ResponseError> {
        if active.body.is_empty() {
            return Ok(BodyPayload::Echo);
        }
        let text = match active.template_source() {
            Some(source) => self.templates.render(source, snapshot)?,
            None => active.body.clone(),
        };
        Ok(BodyPayload::from_text(text))
    }
}

fn template_headers(active: &ResponseTemplate) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(active.headers.len() + 1);
    // Sorted so names differing only in case resolve the same way every time.
    let ordered: BTreeMap<&String, &String> = active.headers.iter().collect();
    for (name, value) in ordered {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid response header"),
        }
    }
    headers
}

fn copy_upstream_headers(proxy: &ProxyConfig, reply: &UpstreamReply, headers: &mut HeaderMap) {
    for name in &proxy.response_headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "Skipping invalid upstream header name");
            continue;
        };
        let values: Vec<HeaderValue> = reply.headers.get_all(&name).iter().cloned().collect();
        if values.is_empty() {
            continue;
        }
        headers.remove(&name);
        for value in values {
            headers.append(name.clone(), value);
        }
    }
}

/// Serialize the payload for the wire.
///
/// Without `include_request` the payload goes out bare. With it, the payload
/// is wrapped as `{"request", "response", "status"}`.
fn encode(
    payload: BodyPayload,
    snapshot: &RequestSnapshot,
    status: StatusCode,
    include_request: bool,
) -> Result<Bytes, ResponseError> {
    if !include_request {
        let bytes = match payload {
            BodyPayload::Echo => serde_json::to_vec(snapshot)?,
            BodyPayload::Literal(text) => text.into_bytes(),
            BodyPayload::Structured(value) => serde_json::to_vec(&value)?,
        };
        return Ok(Bytes::from(bytes));
    }

    let response = match payload {
        BodyPayload::Echo => serde_json::to_value(snapshot)?,
        BodyPayload::Literal(text) => Value::String(text),
        BodyPayload::Structured(value) => value,
    };
    let envelope = Envelope {
        request: snapshot,
        response,
        status: status.as_u16(),
    };
    Ok(Bytes::from(serde_json::to_vec(&envelope)?))
}

/// Plain 500 used for every `ResponseError`.
pub fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
