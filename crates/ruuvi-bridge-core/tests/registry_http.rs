//! HTTP registry tests against a local mock gateway.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ruuvi_bridge_core::{
    HttpRegistry, LocalNode, NodeConfig, PollError, Reconciler, ReconcilerOptions,
    SensorRegistry, handle,
};

async fn gateway(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

fn registry_for(server: &MockServer, timeout: Duration) -> HttpRegistry {
    HttpRegistry::new(&format!("{}/api/tags", server.uri()), timeout).unwrap()
}

#[tokio::test]
async fn test_poll_valid_response() {
    let body = json!([
        {"mac": "AA:BB:CC:DD:EE:FF", "temperature": 24.5, "humidity": 40.0, "last_seen": 1700000000000_i64},
        {"mac": "11:22:33:44:55:66", "temperature": null, "last_seen": 1700000000000_i64}
    ]);
    let server = gateway(ResponseTemplate::new(200).set_body_json(&body)).await;
    let registry = registry_for(&server, Duration::from_secs(5));

    let batch = registry.poll().await.unwrap();

    assert_eq!(batch.records.len(), 2);
    assert!(!batch.has_warnings());
    assert_eq!(batch.records[0].temperature, Some(24.5));
    assert_eq!(batch.records[1].temperature, None);
}

#[tokio::test]
async fn test_poll_non_200_status() {
    let server = gateway(ResponseTemplate::new(500)).await;
    let registry = registry_for(&server, Duration::from_secs(5));

    let err = registry.poll().await.unwrap_err();

    assert!(matches!(err, PollError::Status { status: 500 }));
}

#[tokio::test]
async fn test_poll_empty_204_is_an_error() {
    let server = gateway(ResponseTemplate::new(204)).await;
    let registry = registry_for(&server, Duration::from_secs(5));

    let err = registry.poll().await.unwrap_err();

    assert!(matches!(err, PollError::Status { status: 204 }));
}

#[tokio::test]
async fn test_poll_malformed_body() {
    let server = gateway(ResponseTemplate::new(200).set_body_string("<html>gateway</html>")).await;
    let registry = registry_for(&server, Duration::from_secs(5));

    let err = registry.poll().await.unwrap_err();

    assert!(matches!(err, PollError::Malformed(_)));
}

#[tokio::test]
async fn test_poll_partially_malformed_records() {
    let body = json!([
        {"mac": "AA:BB:CC:DD:EE:FF", "temperature": 24.5, "last_seen": 1},
        {"temperature": 19.0, "last_seen": 1},
        {"mac": "11:22:33:44:55:66", "temperature": "hot", "last_seen": 1}
    ]);
    let server = gateway(ResponseTemplate::new(200).set_body_json(&body)).await;
    let registry = registry_for(&server, Duration::from_secs(5));

    let batch = registry.poll().await.unwrap();

    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.dropped.len(), 2);
    assert_eq!(batch.dropped[0].index, 1);
    assert_eq!(batch.dropped[1].index, 2);
}

#[tokio::test]
async fn test_poll_timeout() {
    let server = gateway(
        ResponseTemplate::new(200)
            .set_body_json(json!([]))
            .set_delay(Duration::from_millis(500)),
    )
    .await;
    let registry = registry_for(&server, Duration::from_millis(50));

    let err = registry.poll().await.unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {}", err);
}

#[tokio::test]
async fn test_poll_unreachable_gateway() {
    // Port 9 (discard) is not expected to be listening
    let registry = HttpRegistry::new("http://127.0.0.1:9/api/tags", Duration::from_secs(2)).unwrap();

    let err = registry.poll().await.unwrap_err();

    assert!(matches!(err, PollError::Transport { .. }));
}

#[tokio::test]
async fn test_gateway_to_local_node() {
    let body = json!([
        {"mac": "AA:BB:CC:DD:EE:FF", "temperature": 21.0, "last_seen": 1},
        {"mac": "11:22:33:44:55:66", "last_seen": 1}
    ]);
    let server = gateway(ResponseTemplate::new(200).set_body_json(&body)).await;
    let registry = Arc::new(registry_for(&server, Duration::from_secs(5)));
    let node = Arc::new(LocalNode::in_memory(NodeConfig::default()));

    let reconciler = Reconciler::new(registry, node.clone(), ReconcilerOptions::default());
    let report = reconciler.run_cycle().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.withheld, 1);

    use ruuvi_bridge_core::DevicePublisher;
    assert!(node.exists(&handle("AA:BB:CC:DD:EE:FF").unwrap()).await.unwrap());
    assert!(!node.exists(&handle("11:22:33:44:55:66").unwrap()).await.unwrap());
}
