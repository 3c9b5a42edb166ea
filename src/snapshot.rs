//! Immutable view of an inbound request.

use crate::error::ResponseError;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::{Request, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::SocketAddr;

/// Everything templates and the echo body can see about a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub query_params: BTreeMap<String, Vec<String>>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub remote_addr: String,
    pub host: String,
    pub protocol: String,
    /// Raw query string, kept for proxy URL building
    #[serde(skip)]
    pub raw_query: Option<String>,
}

impl RequestSnapshot {
    /// Read the whole body and capture the request.
    pub async fn capture<B>(req: Request<B>, remote_addr: SocketAddr) -> Result<Self, ResponseError>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| ResponseError::BodyRead(e.to_string()))?
            .to_bytes();

        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &parts.headers {
            headers
                .entry(header_to_title_case(name.as_str()))
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let host = parts
            .headers
            .get(hyper::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let raw_query = parts.uri.query().map(str::to_string);

        Ok(Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            query_params: parse_query_string(raw_query.as_deref().unwrap_or("")),
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            remote_addr: remote_addr.to_string(),
            host,
            protocol: protocol_name(parts.version).to_string(),
            raw_query,
        })
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Convert a header name to Title-Case (`content-type` -> `Content-Type`).
pub fn header_to_title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a query string into multi-valued parameters.
pub fn parse_query_string(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params.entry(decode(key)).or_default().push(decode(value));
    }
    params
}

fn decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}
