//! Integration tests for the IDE server
//!
//! These tests require a running server with access to Docker.
//! Run with: IDE_TEST_URL=http://127.0.0.1:8080 cargo test -- --ignored

use std::time::Duration;

use integration_tests::*;
use serde_json::json;

const GATEWAY_WAIT: Duration = Duration::from_secs(30);

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_health_check() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    assert!(
        response.status().is_success(),
        "Health check failed with status: {}",
        response.status()
    );

    let health: HealthResponse = response.json().await.expect("Failed to parse health response");
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());
}

// ============================================================================
// Container Lifecycle Tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_container_lifecycle() {
    let config = TestConfig::new();
    let project = create_project(&config, "lifecycle").await;
    let provision_url = config.api_url(&format!("/projects/{}/container", project.id));

    let response = config
        .client
        .post(&provision_url)
        .json(&json!({}))
        .send()
        .await
        .expect("Failed to provision container");
    assert_eq!(response.status(), 201);
    let created: ContainerSummary = response.json().await.unwrap();
    assert_eq!(created.status, "RUNNING");
    assert!(created.host_port.is_some());

    let response = config
        .client
        .post(&provision_url)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let retrieved: ContainerSummary = response.json().await.unwrap();
    assert_eq!(retrieved.container_id, created.container_id);

    let stopped: ContainerResponse = config
        .client
        .post(config.api_url(&format!(
            "/containers/{}/stop?timeout=2",
            created.container_id
        )))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped.status, "STOPPED");

    let started: ContainerResponse = config
        .client
        .post(config.api_url(&format!("/containers/{}/start", created.container_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started.status, "RUNNING");

    let preview = config
        .client
        .get(config.api_url(&format!("/containers/{}/preview", created.container_id)))
        .send()
        .await
        .unwrap();
    assert!(preview.status().is_success());

    let deleted: ContainerResponse = config
        .client
        .delete(config.api_url(&format!("/containers/{}", created.container_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted.status, "DELETED");
    assert_eq!(deleted.host_port, None);

    let preview = config
        .client
        .get(config.api_url(&format!("/containers/{}/preview", created.container_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(preview.status(), 409);

    cleanup_project(&config, &project.id).await;
}

// ============================================================================
// File Tree Tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_file_create_rename_delete() {
    let config = TestConfig::new();
    let project = create_project(&config, "files").await;
    config
        .client
        .post(config.api_url(&format!("/projects/{}/container", project.id)))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    let files_url = config.api_url(&format!("/projects/{}/files", project.id));
    let response = config
        .client
        .post(&files_url)
        .json(&json!({ "name": "a.txt", "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let file: FileNodeResponse = response.json().await.unwrap();
    assert_eq!(file.path, "/a.txt");

    let duplicate = config
        .client
        .post(&files_url)
        .json(&json!({ "name": "a.txt" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    let renamed: FileNodeResponse = config
        .client
        .post(config.api_url(&format!("/files/{}/rename", file.id)))
        .json(&json!({ "newName": "b.txt" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed.path, "/b.txt");

    let content: serde_json::Value = config
        .client
        .get(config.api_url(&format!("/files/{}/content", file.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(content["content"], "hello");

    let response = config
        .client
        .delete(config.api_url(&format!("/files/{}", file.id)))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let missing = config
        .client
        .get(config.api_url(&format!("/files/{}/content", file.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let error: ErrorResponse = missing.json().await.unwrap();
    assert_eq!(error.code, 3001);

    cleanup_project(&config, &project.id).await;
}

#[tokio::test]
#[ignore]
async fn test_malformed_watcher_event_is_rejected() {
    let config = TestConfig::new();

    let response = config
        .client
        .post(config.api_url("/internal/fs-events"))
        .json(&json!({ "containerId": "x", "event": "rename", "type": "file", "path": "/a" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = config
        .client
        .post(config.api_url("/internal/fs-events"))
        .json(&json!({ "containerId": "0123456789ab", "event": "create", "type": "file", "path": "/workspace/a" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

// ============================================================================
// Gateway Tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_gateway_terminal_and_filesystem() {
    let config = TestConfig::new();
    let project = create_project(&config, "gateway").await;
    let container: ContainerSummary = config
        .client
        .post(config.api_url(&format!("/projects/{}/container", project.id)))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let mut ws = connect_gateway(&config).await;
    send_message(&mut ws, "register", json!({ "containerId": container.container_id })).await;
    let registered = expect_message(&mut ws, "registered", GATEWAY_WAIT).await;
    assert_eq!(registered["containerId"], container.container_id.as_str());
    expect_message(&mut ws, "terminal-ready", GATEWAY_WAIT).await;

    send_message(&mut ws, "get-initial-filesystem", json!({ "containerId": container.container_id })).await;
    let initial = expect_message(&mut ws, "initial-filesystem", GATEWAY_WAIT).await;
    assert_eq!(initial["projectId"], project.id.as_str());

    send_message(&mut ws, "terminal-input", json!({ "data": "touch from-terminal.txt\n" })).await;
    let update = expect_message(&mut ws, "filesystem-update", GATEWAY_WAIT).await;
    assert_eq!(update["event"], "create");
    assert_eq!(update["path"], "/from-terminal.txt");

    let mut second = connect_gateway(&config).await;
    send_message(&mut second, "register", json!({ "containerId": container.container_id })).await;
    let replay = expect_message(&mut second, "terminal-output", GATEWAY_WAIT).await;
    assert!(!replay["data"].as_str().unwrap_or_default().is_empty());

    cleanup_project(&config, &project.id).await;
}
