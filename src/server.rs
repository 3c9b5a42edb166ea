//! HTTP listener and request routing.

use crate::admin;
use crate::config::ServerConfig;
use crate::counter::RequestCounter;
use crate::matcher::{CompiledRule, RuleStore};
use crate::proxy::Upstream;
use crate::snapshot::RequestSnapshot;
use crate::synthesizer::{internal_error, ResponseSynthesizer};
use crate::ui;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, warn};

/// How long in-flight connections get to finish after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared state for every connection.
pub struct AppState {
    pub config: ServerConfig,
    pub rules: RuleStore,
    pub counter: RequestCounter,
    pub synthesizer: ResponseSynthesizer,
    pub ui_dir: Option<PathBuf>,
}

impl AppState {
    /// Create state with an empty rule store and zeroed counters.
    pub fn new(config: ServerConfig, upstream: Arc<dyn Upstream>) -> Self {
        let synthesizer = ResponseSynthesizer::new(config.default_response.clone(), upstream);
        Self {
            config,
            rules: RuleStore::new(),
            counter: RequestCounter::new(),
            synthesizer,
            ui_dir: None,
        }
    }

    /// Serve the admin UI from `dir`.
    pub fn with_ui_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.ui_dir = dir;
        self
    }
}

/// Count, route and log one request.
pub async fn handle<B>(state: &AppState, req: Request<B>, remote: SocketAddr) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let global_count = state.counter.increment_global();
    let path_count = state.counter.increment_path(&path);
    info!(
        global_count,
        path_count,
        method = %method,
        path = %path,
        remote_addr = %remote,
        "Request started"
    );

    let response = route(state, req, remote, &path, path_count).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        size = response.body().size_hint().exact().unwrap_or(0),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}

async fn route<B>(
    state: &AppState,
    req: Request<B>,
    remote: SocketAddr,
    path: &str,
    path_count: u64,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    if path == "/config" || path.starts_with("/config/") {
        return admin::handle_config(state, req).await;
    }
    if path == "/counter" {
        return admin::handle_counter(state, &req);
    }
    if path == "/ui" || path.starts_with("/ui/") {
        return ui::serve(state.ui_dir.as_deref(), path).await;
    }
    respond_with_rule(state, req, remote, path_count).await
}

async fn respond_with_rule<B>(
    state: &AppState,
    req: Request<B>,
    remote: SocketAddr,
    path_count: u64,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let snapshot = match RequestSnapshot::capture(req, remote).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "Failed to capture request");
            return internal_error();
        }
    };

    let rule = state.rules.find(&snapshot.path, &snapshot.method);
    match &rule {
        Some(rule) => debug!(rule = %rule.definition().label(), "Rule matched"),
        None => debug!(path = %snapshot.path, "No rule matched, using default response"),
    }

    match state
        .synthesizer
        .build(snapshot, rule.as_deref().map(CompiledRule::definition), path_count)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to build response");
            internal_error()
        }
    }
}

async fn handle_with_deadline(
    state: Arc<AppState>,
    req: Request<Incoming>,
    remote: SocketAddr,
) -> Result<Response<Full<Bytes>>, Elapsed> {
    let write_timeout = state.config.write_timeout;
    if write_timeout.is_zero() {
        return Ok(handle(&state, req, remote).await);
    }
    tokio::time::timeout(write_timeout, handle(&state, req, remote))
        .await
        .map_err(|e| {
            warn!(remote_addr = %remote, timeout = ?write_timeout, "Write timeout exceeded, closing connection");
            e
        })
}

/// Accept connections until `shutdown` resolves, then drain.
///
/// In-flight connections are asked to finish their current request and get
/// [`SHUTDOWN_GRACE`] to do so before being aborted.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, rules = state.rules.len(), "Echo mock server listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                connections.spawn(serve_connection(
                    stream,
                    remote,
                    Arc::clone(&state),
                    stop_rx.clone(),
                ));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    info!(connections = connections.len(), "Shutting down, draining connections");
    if let Err(e) = stop_tx.send(true) {
        debug!(error = %e, "No connection is listening for shutdown");
    }

    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Connections still open after grace period, aborting");
        connections.abort_all();
    }
    info!("Server stopped");
    Ok(())
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote: SocketAddr,
    state: Arc<AppState>,
    mut stop: watch::Receiver<bool>,
) {
    let read_timeout = state.config.read_timeout;
    let service = service_fn(move |req| handle_with_deadline(Arc::clone(&state), req, remote));

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new());
    if !read_timeout.is_zero() {
        builder.header_read_timeout(read_timeout);
    }

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = stop.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        debug!(remote_addr = %remote, error = %e, "Connection error");
    }
}
