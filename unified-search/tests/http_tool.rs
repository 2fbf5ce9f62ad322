//! `HttpTool` against a mock HTTP backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use unified_search::tools::HttpTool;
use unified_search::{
    SearchConfig, SearchError, SearchMode, SearchOrchestrator, SearchTool, SourceKind, ToolHealth,
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tool(server: &MockServer, timeout: Duration) -> HttpTool {
    HttpTool::new(
        "gov-data",
        &format!("{}/tools/gov", server.uri()),
        SourceKind::RemoteTool(0),
        timeout,
    )
    .expect("valid endpoint")
}

#[tokio::test]
async fn execute_posts_query_and_parses_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tools/gov/execute"))
        .and(body_json(json!({ "query": "submarine acquisition" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "content": { "programme": "SSN" }, "title": "Programme", "confidence": 0.9 },
            { "content": "plain text hit" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let results = tool(&server, Duration::from_secs(5))
        .execute("submarine acquisition")
        .await
        .expect("execute");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title.as_deref(), Some("Programme"));
    assert_eq!(results[0].confidence, Some(0.9));
    assert_eq!(results[1].content, json!("plain text hit"));
}

#[tokio::test]
async fn server_error_is_backend_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tools/gov/execute"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = tool(&server, Duration::from_secs(5))
        .execute("q")
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::BackendUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_backend_is_backend_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tools/gov/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = tool(&server, Duration::from_millis(200))
        .execute("q")
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::BackendTimeout(_)), "got {err}");
}

#[tokio::test]
async fn health_check_reads_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools/gov/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "degraded" })))
        .mount(&server)
        .await;

    let health = tool(&server, Duration::from_secs(5))
        .health_check()
        .await
        .expect("health");
    assert_eq!(health, ToolHealth::Degraded);
}

#[tokio::test]
async fn health_check_non_success_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools/gov/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let health = tool(&server, Duration::from_secs(5))
        .health_check()
        .await
        .expect("health");
    assert_eq!(health, ToolHealth::Unhealthy);
}

#[tokio::test]
async fn orchestrator_queries_discovered_http_tool() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools/gov/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "healthy" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tools/gov/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "content": "tender notice", "url": "https://tenders.example/1", "confidence": 0.75 }
        ])))
        .mount(&server)
        .await;

    let orchestrator = SearchOrchestrator::new(SearchConfig::default()).expect("orchestrator");
    orchestrator
        .registry()
        .register(Arc::new(tool(&server, Duration::from_secs(5))));

    let results = orchestrator
        .process_query("tenders", SearchMode::RemoteOnly, &CancellationToken::new())
        .await;
    assert_eq!(results.len(), 1);
    let source = &results.results[0].sources()[0];
    assert_eq!(source.source_kind, SourceKind::RemoteTool(0));
    assert_eq!(source.url.as_deref(), Some("https://tenders.example/1"));
    assert!((source.reliability - 0.8).abs() < f64::EPSILON);
}
