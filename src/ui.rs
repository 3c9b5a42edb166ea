//! Static admin UI served from a directory.

use crate::admin::{build_response_with_headers, not_found};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::path::{Component, Path};
use tracing::debug;

const INDEX_FILES: [&str; 2] = ["index.html", "ui.html"];

/// Serve a request under `/ui`.
pub async fn serve(ui_dir: Option<&Path>, path: &str) -> Response<Full<Bytes>> {
    if path == "/ui" {
        return build_response_with_headers(
            StatusCode::PERMANENT_REDIRECT,
            [("Location", "/ui/")],
            Bytes::new(),
        );
    }
    let Some(dir) = ui_dir else {
        return not_found();
    };

    let Some(encoded) = path.strip_prefix("/ui/") else {
        return not_found();
    };
    let Ok(relative) = urlencoding::decode(encoded) else {
        return not_found();
    };
    // Only plain names below the UI directory; no root, prefix or `..`.
    if !Path::new(&*relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return not_found();
    }

    let candidates: Vec<&str> = if relative.is_empty() {
        INDEX_FILES.to_vec()
    } else {
        vec![&*relative]
    };

    for candidate in candidates {
        let file = dir.join(candidate);
        match tokio::fs::read(&file).await {
            Ok(contents) => {
                return build_response_with_headers(
                    StatusCode::OK,
                    [("Content-Type", content_type(candidate))],
                    contents,
                )
            }
            Err(e) => debug!(file = %file.display(), error = %e, "UI file not readable"),
        }
    }
    not_found()
}

fn content_type(file: &str) -> &'static str {
    match Path::new(file).extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        _ => "text/plain; charset=utf-8",
    }
}
