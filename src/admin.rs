//! Administrative endpoints.
//!
//! `/config` exposes rule CRUD over the live [`RuleStore`](crate::matcher::RuleStore)
//! and `/counter` reads or resets the request counters. Bodies are JSON;
//! failures come back as `{"error": "<message>"}`.

use crate::config::{RuleDefinition, ServerConfig};
use crate::error::RuleError;
use crate::server::AppState;
use crate::snapshot::parse_query_string;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::debug;

/// Build a response with the given status and body.
pub fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Build a response with headers. Invalid headers fall back to a bare 500.
pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| build_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
}

/// Serialize `body` as a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// JSON error body.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

fn no_content() -> Response<Full<Bytes>> {
    build_response(StatusCode::NO_CONTENT, Bytes::new())
}

fn rule_error_response(err: &RuleError) -> Response<Full<Bytes>> {
    let status = match err {
        RuleError::Pattern { .. } | RuleError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
        RuleError::DuplicateName(_) => StatusCode::CONFLICT,
        RuleError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    error_response(status, &err.to_string())
}

async fn parse_rule<B>(req: Request<B>) -> Result<RuleDefinition, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Display,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("Failed to read body: {e}")))?
        .to_bytes();
    serde_json::from_slice(&body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("Invalid rule JSON: {e}")))
}

#[derive(Serialize)]
struct ConfigView<'a> {
    server: &'a ServerConfig,
    paths: Vec<RuleDefinition>,
}

/// Dispatch a request under `/config`.
pub async fn handle_config<B>(state: &AppState, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = parse_query_string(req.uri().query().unwrap_or(""));

    let segments: Vec<String> = path
        .strip_prefix("/config")
        .unwrap_or(&path)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    debug!(method = %method, path = %path, "Admin request");

    match (&method, segments.as_slice()) {
        (&Method::GET, []) => json_response(
            StatusCode::OK,
            &ConfigView {
                server: &state.config,
                paths: state.rules.all(),
            },
        ),
        (&Method::GET, ["paths"]) => {
            match query.get("name").and_then(|names| names.first()) {
                Some(name) => match state.rules.get(name) {
                    Some(rule) => json_response(StatusCode::OK, &vec![rule]),
                    None => error_response(StatusCode::NOT_FOUND, &format!("no rule named {name:?}")),
                },
                None => json_response(StatusCode::OK, &state.rules.all()),
            }
        }
        (&Method::POST, ["paths"]) => {
            let rule = match parse_rule(req).await {
                Ok(rule) => rule,
                Err(response) => return response,
            };
            match state.rules.add(rule.clone()) {
                Ok(()) => json_response(StatusCode::CREATED, &rule),
                Err(e) => rule_error_response(&e),
            }
        }
        (&Method::DELETE, ["paths"]) => {
            state.rules.clear();
            no_content()
        }
        (&Method::GET, ["paths", name]) => match state.rules.get(name) {
            Some(rule) => json_response(StatusCode::OK, &rule),
            None => error_response(StatusCode::NOT_FOUND, &format!("no rule named {name:?}")),
        },
        (&Method::PUT, ["paths", name]) => {
            let name = name.to_string();
            let mut rule = match parse_rule(req).await {
                Ok(rule) => rule,
                Err(response) => return response,
            };
            rule.name = Some(name.clone());
            match state.rules.replace(&name, rule.clone()) {
                Ok(()) => json_response(StatusCode::OK, &rule),
                Err(e) => rule_error_response(&e),
            }
        }
        (&Method::DELETE, ["paths", name]) => {
            if state.rules.delete(name) {
                no_content()
            } else {
                error_response(StatusCode::NOT_FOUND, &format!("no rule named {name:?}"))
            }
        }
        (_, [] | ["paths"] | ["paths", _]) => method_not_allowed(),
        _ => not_found(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CounterView {
    global_count: u64,
    path_counts: BTreeMap<String, u64>,
}

/// Handle `/counter`.
pub fn handle_counter<B>(state: &AppState, req: &Request<B>) -> Response<Full<Bytes>> {
    match *req.method() {
        Method::GET => json_response(
            StatusCode::OK,
            &CounterView {
                global_count: state.counter.global(),
                path_counts: state.counter.all_paths().into_iter().collect(),
            },
        ),
        Method::DELETE => {
            let query = parse_query_string(req.uri().query().unwrap_or(""));
            match query.get("path").and_then(|paths| paths.first()) {
                Some(path) => state.counter.reset_path(path),
                None => state.counter.reset_all(),
            }
            no_content()
        }
        _ => method_not_allowed(),
    }
}
