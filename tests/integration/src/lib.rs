//! Shared helpers for black-box tests against a running IDE server

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Server under test, taken from `IDE_TEST_URL`
pub struct TestConfig {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestConfig {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let base_url =
            std::env::var("IDE_TEST_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self { base_url, client }
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn ws_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base
            .strip_prefix("https://")
            .map(|rest| format!("wss://{}", rest))
            .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{}", rest)))
            .unwrap_or_else(|| base.to_string());
        format!("{}/api/v1/ws", base)
    }

    /// Image used for test templates, `IDE_TEST_IMAGE` or `node:20`
    pub fn image(&self) -> String {
        std::env::var("IDE_TEST_IMAGE").unwrap_or_else(|_| "node:20".to_string())
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    pub image: Option<String>,
    pub internal_port: Option<u16>,
    pub start_command: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub container_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub container_id: String,
    pub status: String,
    pub host_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResponse {
    pub container_id: String,
    pub status: String,
    pub host_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNodeResponse {
    pub id: String,
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

/// Create a template and a project on it
pub async fn create_project(config: &TestConfig, name: &str) -> ProjectResponse {
    let template: TemplateResponse = config
        .client
        .post(config.api_url("/templates"))
        .json(&CreateTemplateRequest {
            name: format!("{}-{}", name, uuid::Uuid::new_v4().simple()),
            image: Some(config.image()),
            internal_port: Some(3000),
            start_command: Some("sleep infinity".to_string()),
        })
        .send()
        .await
        .expect("Failed to create template")
        .json()
        .await
        .expect("Failed to parse template");

    config
        .client
        .post(config.api_url("/projects"))
        .json(&json!({ "name": name, "templateId": template.id }))
        .send()
        .await
        .expect("Failed to create project")
        .json()
        .await
        .expect("Failed to parse project")
}

pub async fn cleanup_project(config: &TestConfig, project_id: &str) {
    let _ = config
        .client
        .delete(config.api_url(&format!("/projects/{}", project_id)))
        .send()
        .await;
}

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a gateway connection
pub async fn connect_gateway(config: &TestConfig) -> WsStream {
    let (stream, _) = connect_async(config.ws_url())
        .await
        .expect("Failed to connect to gateway");
    stream
}

pub async fn send_message(ws: &mut WsStream, kind: &str, payload: Value) {
    let frame = json!({ "type": kind, "payload": payload }).to_string();
    ws.send(Message::Text(frame.into()))
        .await
        .expect("Failed to send gateway message");
}

/// Wait for the next gateway message of `kind`, skipping others
pub async fn expect_message(ws: &mut WsStream, kind: &str, wait: Duration) -> Value {
    tokio::time::timeout(wait, async {
        while let Some(frame) = ws.next().await {
            let Ok(Message::Text(text)) = frame else {
                continue;
            };
            let value: Value = serde_json::from_str(text.as_str()).expect("Invalid gateway frame");
            if value["type"] == kind {
                return value["payload"].clone();
            }
        }
        panic!("Gateway closed while waiting for {}", kind);
    })
    .await
    .unwrap_or_else(|_| panic!("Timed out waiting for {}", kind))
}
