//! Request pipeline scenarios driven through the router.

use bytes::Bytes;
use echo_mock_server::{handle, load_inline_rules, AppState, HttpUpstream, RequestSnapshot, ServerConfig};
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_config() -> ServerConfig {
    let yaml = r#"
host: 127.0.0.1
port: 0
defaultResponse:
  statusCode: 200
  headers:
    Content-Type: application/json

paths:
  - name: test
    pattern: ^/test/.*
    methods: [GET]
    response:
      statusCode: 201
      headers:
        X-Custom: test
      body: '{"test":true}'

  - name: template
    pattern: ^/template$
    response:
      body: 'template:{"path":"{{.Path}}{{.Method}}"}'

  - name: flaky
    pattern: ^/flaky$
    errorEvery: 3
    response:
      statusCode: 200
    errorResponse:
      statusCode: 500
      body: '{"error":"injected"}'

  - name: slow
    pattern: ^/slow$
    response:
      delay: 100ms
      body: '{"slow":true}'

  - name: fast
    pattern: ^/fast$
    response:
      body: '{"fast":true}'
"#;
    serde_yaml::from_str(yaml).unwrap()
}

fn test_state() -> Arc<AppState> {
    let state = AppState::new(test_config(), Arc::new(HttpUpstream::new().unwrap()));
    assert_eq!(load_inline_rules(&state.config, &state.rules), 5);
    Arc::new(state)
}

fn remote() -> SocketAddr {
    "192.0.2.10:55000".parse().unwrap()
}

fn request(method: &str, uri: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "mock.test")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn body_string(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_matched_rule_static_body() {
    let state = test_state();
    let response = handle(&state, request("GET", "/test/123", ""), remote()).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["X-Custom"], "test");
    assert_eq!(response.headers()["Content-Type"], "application/json");
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, serde_json::json!({"test": true}));
}

#[tokio::test]
async fn test_method_mismatch_falls_back_to_echo() {
    let state = test_state();
    let response = handle(&state, request("POST", "/test/123", "payload"), remote()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let echoed: RequestSnapshot = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(echoed.method, "POST");
    assert_eq!(echoed.body, "payload");
}

#[tokio::test]
async fn test_unmatched_request_echoes_snapshot() {
    let state = test_state();
    let response = handle(&state, request("GET", "/other?x=1&x=2", ""), remote()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["Content-Type"], "application/json");

    let echoed: RequestSnapshot = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(echoed.path, "/other");
    assert_eq!(echoed.method, "GET");
    assert_eq!(echoed.query_params["x"], vec!["1", "2"]);
    assert_eq!(echoed.headers["Host"], vec!["mock.test"]);
    assert_eq!(echoed.host, "mock.test");
    assert_eq!(echoed.remote_addr, "192.0.2.10:55000");
}

#[tokio::test]
async fn test_template_body_exact() {
    let state = test_state();
    let response = handle(&state, request("GET", "/template", ""), remote()).await;
    assert_eq!(body_string(response).await, r#"{"path":"/templateGET"}"#);
}

#[tokio::test]
async fn test_error_every_third_hit() {
    let state = test_state();
    let mut statuses = Vec::new();
    for _ in 0..9 {
        let response = handle(&state, request("GET", "/flaky", ""), remote()).await;
        statuses.push(response.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 500, 200, 200, 500, 200, 200, 500]);
    assert_eq!(state.counter.path("/flaky"), 9);
}

#[tokio::test]
async fn test_error_cadence_is_per_path() {
    let state = test_state();
    handle(&state, request("GET", "/flaky", ""), remote()).await;
    handle(&state, request("GET", "/other", ""), remote()).await;
    handle(&state, request("GET", "/other", ""), remote()).await;

    // Third global request, but only the second hit on /flaky
    let response = handle(&state, request("GET", "/flaky", ""), remote()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = handle(&state, request("GET", "/flaky", ""), remote()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_delay_blocks_only_its_own_request() {
    let state = test_state();

    let start = Instant::now();
    let slow = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            handle(&state, request("GET", "/slow", ""), remote()).await;
            start.elapsed()
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast = handle(&state, request("GET", "/fast", ""), remote()).await;
    let fast_elapsed = start.elapsed();
    assert_eq!(body_string(fast).await, r#"{"fast":true}"#);

    let slow_elapsed = slow.await.unwrap();
    assert!(slow_elapsed >= Duration::from_millis(100));
    assert!(fast_elapsed < slow_elapsed);
}

#[tokio::test]
async fn test_rule_added_at_runtime_is_matched() {
    let state = test_state();
    let response = handle(
        &state,
        request(
            "POST",
            "/config/paths",
            r#"{"name":"late","pattern":"^/late$","response":{"statusCode":202,"body":"ok"}}"#,
        ),
        remote(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = handle(&state, request("GET", "/late", ""), remote()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_string(response).await, "ok");

    let response = handle(&state, request("DELETE", "/config/paths/late", ""), remote()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = handle(&state, request("GET", "/late", ""), remote()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_counter_endpoint_sees_all_traffic() {
    let state = test_state();
    handle(&state, request("GET", "/test/1", ""), remote()).await;
    handle(&state, request("GET", "/config", ""), remote()).await;

    let response = handle(&state, request("GET", "/counter", ""), remote()).await;
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["globalCount"], 3);
    assert_eq!(body["pathCounts"]["/test/1"], 1);
    assert_eq!(body["pathCounts"]["/config"], 1);
    assert_eq!(body["pathCounts"]["/counter"], 1);

    let response = handle(&state, request("DELETE", "/counter", ""), remote()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_string(response).await.is_empty());
    assert_eq!(state.counter.global(), 0);
    assert_eq!(state.counter.path("/test/1"), 0);
}
