//! Workspace watcher
//!
//! Runs inside a project container, watches the workspace recursively and
//! reports every change to the IDE server so the stored file tree follows
//! edits made from the terminal.

mod classify;
mod reporter;

use std::path::{Path, PathBuf};

use anyhow::Context;
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use classify::Classifier;
use reporter::Reporter;

/// Settings handed to the container by the server
#[derive(Debug)]
struct WatchConfig {
    dir: PathBuf,
    container_id: String,
    excludes: Vec<String>,
    callback_url: String,
}

impl WatchConfig {
    fn from_env() -> anyhow::Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let dir = PathBuf::from(var("WATCH_DIR").unwrap_or_else(|| "/workspace".to_string()));
        let container_id = var("WATCH_CONTAINER_ID")
            .or_else(|| var("HOSTNAME"))
            .context("WATCH_CONTAINER_ID or HOSTNAME must be set")?;
        let host = var("WATCH_CALLBACK_HOST").unwrap_or_else(|| "host.docker.internal".to_string());
        let port: u16 = var("WATCH_CALLBACK_PORT")
            .map(|p| p.parse())
            .transpose()
            .context("WATCH_CALLBACK_PORT must be a port number")?
            .unwrap_or(8080);
        let endpoint = var("WATCH_CALLBACK_ENDPOINT")
            .unwrap_or_else(|| "/api/v1/internal/fs-events".to_string());
        let excludes = var("WATCH_EXCLUDES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            dir,
            container_id,
            excludes,
            callback_url: callback_url(&host, port, &endpoint),
        })
    }
}

fn callback_url(host: &str, port: u16, endpoint: &str) -> String {
    format!("http://{}:{}/{}", host, port, endpoint.trim_start_matches('/'))
}

fn live_kind(path: &Path) -> Option<bool> {
    std::fs::symlink_metadata(path).ok().map(|m| m.is_dir())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = WatchConfig::from_env()?;
    let reporter = Reporter::new(config.callback_url.clone())?;
    let classifier = Classifier::new(
        config.dir.clone(),
        config.container_id.clone(),
        config.excludes.clone(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        if tx.send(res).is_err() {
            debug!("Watch channel closed");
        }
    })
    .context("Failed to initialize watcher")?;
    watcher
        .watch(&config.dir, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", config.dir.display()))?;

    info!(
        "Watching {} for container {}, reporting to {}",
        config.dir.display(),
        config.container_id,
        reporter.url()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            incoming = rx.recv() => match incoming {
                Some(Ok(event)) => {
                    for report in classifier.classify(&event, live_kind) {
                        debug!("{:?} {:?} {}", report.event, report.entry, report.path);
                        reporter.send(&report).await;
                    }
                }
                Some(Err(e)) => warn!("Watcher error: {}", e),
                None => break,
            },
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}
