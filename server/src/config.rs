//! Server configuration

use std::time::Duration;

use serde::Deserialize;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Database URL (SQLite)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Docker socket path. Local defaults are used when unset.
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Deployment environment ("development" or "production")
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Workspace root directory inside every project container
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Prefix for container and volume names
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// First host port handed out to project containers
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last host port handed out to project containers (inclusive)
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// Docker network name for project containers
    #[serde(default)]
    pub docker_network: Option<String>,

    /// Extra hosts to add to project containers (e.g., "host.docker.internal:host-gateway")
    #[serde(default = "default_extra_hosts")]
    pub container_extra_hosts: Vec<String>,

    /// Shell started for interactive terminals
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Non-privileged user that owns terminals and file operations
    #[serde(default = "default_shell_user")]
    pub shell_user: String,

    /// Numeric uid/gid written into pushed archives
    #[serde(default = "default_workspace_uid")]
    pub workspace_uid: u64,

    #[serde(default = "default_workspace_uid")]
    pub workspace_gid: u64,

    /// Host the in-container watcher reports to
    #[serde(default = "default_watcher_callback_host")]
    pub watcher_callback_host: String,

    /// Port the in-container watcher reports to (defaults to the HTTP port)
    #[serde(default)]
    pub watcher_callback_port: Option<u16>,

    /// Endpoint the in-container watcher posts events to
    #[serde(default = "default_watcher_endpoint")]
    pub watcher_endpoint: String,

    /// Public hostname used for preview URLs
    #[serde(default)]
    pub public_host: Option<String>,

    /// Public protocol used for preview URLs
    #[serde(default)]
    pub public_protocol: Option<String>,

    /// Seconds a terminal without clients survives before teardown
    #[serde(default = "default_terminal_grace_period")]
    pub terminal_grace_period: u64,

    /// Number of output chunks kept for replay
    #[serde(default = "default_scrollback_limit")]
    pub scrollback_limit: usize,

    /// Default graceful stop timeout in seconds
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: i64,

    /// Timeout for one-shot exec calls in seconds
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout: u64,

    /// Upper bound for mirroring a content write into the container, in seconds
    #[serde(default = "default_mirror_timeout")]
    pub mirror_timeout: u64,

    /// Files up to this size get their content inlined by the workspace scan
    #[serde(default = "default_inline_content_limit")]
    pub inline_content_limit: u64,

    /// Directory names skipped by the workspace scan and the watcher
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite:data/ide.db?mode=rwc".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_workspace_dir() -> String {
    "/workspace".to_string()
}

fn default_container_prefix() -> String {
    "ide-project".to_string()
}

fn default_port_range_start() -> u16 {
    32000
}

fn default_port_range_end() -> u16 {
    32999
}

fn default_extra_hosts() -> Vec<String> {
    vec!["host.docker.internal:host-gateway".to_string()]
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_shell_user() -> String {
    "node".to_string()
}

fn default_workspace_uid() -> u64 {
    1000
}

fn default_watcher_callback_host() -> String {
    "host.docker.internal".to_string()
}

fn default_watcher_endpoint() -> String {
    "/api/v1/internal/fs-events".to_string()
}

fn default_terminal_grace_period() -> u64 {
    15
}

fn default_scrollback_limit() -> usize {
    1000
}

fn default_stop_timeout() -> i64 {
    10
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_mirror_timeout() -> u64 {
    5
}

fn default_inline_content_limit() -> u64 {
    100 * 1024
}

fn default_excluded_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        ".next",
        "dist",
        "build",
        ".cache",
        "__pycache__",
        "target",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(val) = std::env::var("IDE_HTTP_HOST") {
            config.http_host = val;
        }
        if let Ok(val) = std::env::var("IDE_HTTP_PORT") {
            config.http_port = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_DATABASE_URL") {
            config.database_url = val;
        }
        if let Ok(val) = std::env::var("IDE_DOCKER_SOCKET") {
            config.docker_socket = Some(val);
        }
        if let Ok(val) = std::env::var("IDE_ENV") {
            config.environment = val;
        }
        if let Ok(val) = std::env::var("IDE_WORKSPACE_DIR") {
            config.workspace_dir = val;
        }
        if let Ok(val) = std::env::var("IDE_CONTAINER_PREFIX") {
            config.container_prefix = val;
        }
        if let Ok(val) = std::env::var("IDE_PORT_RANGE_START") {
            config.port_range_start = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_PORT_RANGE_END") {
            config.port_range_end = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_DOCKER_NETWORK") {
            config.docker_network = Some(val);
        }
        if let Ok(val) = std::env::var("IDE_CONTAINER_EXTRA_HOSTS") {
            config.container_extra_hosts = parse_list(&val);
        }
        if let Ok(val) = std::env::var("IDE_SHELL") {
            config.shell = val;
        }
        if let Ok(val) = std::env::var("IDE_SHELL_USER") {
            config.shell_user = val;
        }
        if let Ok(val) = std::env::var("IDE_WORKSPACE_UID") {
            config.workspace_uid = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_WORKSPACE_GID") {
            config.workspace_gid = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_WATCHER_CALLBACK_HOST") {
            config.watcher_callback_host = val;
        }
        if let Ok(val) = std::env::var("IDE_WATCHER_CALLBACK_PORT") {
            config.watcher_callback_port = Some(val.parse()?);
        }
        if let Ok(val) = std::env::var("IDE_WATCHER_ENDPOINT") {
            config.watcher_endpoint = val;
        }
        if let Ok(val) = std::env::var("IDE_PUBLIC_HOST") {
            config.public_host = Some(val);
        }
        if let Ok(val) = std::env::var("IDE_PUBLIC_PROTOCOL") {
            config.public_protocol = Some(val);
        }
        if let Ok(val) = std::env::var("IDE_TERMINAL_GRACE_PERIOD") {
            config.terminal_grace_period = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_SCROLLBACK_LIMIT") {
            config.scrollback_limit = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_STOP_TIMEOUT") {
            config.stop_timeout = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_EXEC_TIMEOUT") {
            config.exec_timeout = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_MIRROR_TIMEOUT") {
            config.mirror_timeout = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_INLINE_CONTENT_LIMIT") {
            config.inline_content_limit = val.parse()?;
        }
        if let Ok(val) = std::env::var("IDE_EXCLUDED_DIRS") {
            config.excluded_dirs = parse_list(&val);
        }

        if config.port_range_start > config.port_range_end {
            anyhow::bail!(
                "invalid port range {}-{}",
                config.port_range_start,
                config.port_range_end
            );
        }

        Ok(config)
    }

    /// Whether error details must be hidden from API consumers
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Port the in-container watcher should call back on
    pub fn watcher_port(&self) -> u16 {
        self.watcher_callback_port.unwrap_or(self.http_port)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_secs(self.terminal_grace_period)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout)
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout)
    }

    /// Conventional runtime name for a project's container
    pub fn container_name(&self, project_id: &str) -> String {
        format!("{}-{}", self.container_prefix, project_id)
    }

    /// Persistent volume backing a project's workspace
    pub fn volume_name(&self, project_id: &str) -> String {
        format!("{}-{}-data", self.container_prefix, project_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            database_url: default_database_url(),
            docker_socket: None,
            environment: default_environment(),
            workspace_dir: default_workspace_dir(),
            container_prefix: default_container_prefix(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            docker_network: None,
            container_extra_hosts: default_extra_hosts(),
            shell: default_shell(),
            shell_user: default_shell_user(),
            workspace_uid: default_workspace_uid(),
            workspace_gid: default_workspace_uid(),
            watcher_callback_host: default_watcher_callback_host(),
            watcher_callback_port: None,
            watcher_endpoint: default_watcher_endpoint(),
            public_host: None,
            public_protocol: None,
            terminal_grace_period: default_terminal_grace_period(),
            scrollback_limit: default_scrollback_limit(),
            stop_timeout: default_stop_timeout(),
            exec_timeout: default_exec_timeout(),
            mirror_timeout: default_mirror_timeout(),
            inline_content_limit: default_inline_content_limit(),
            excluded_dirs: default_excluded_dirs(),
        }
    }
}
