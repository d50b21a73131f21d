use serde::{Deserialize, Serialize};

/// Main configuration structure for conductor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Plan runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Remote agent runtime configuration
    #[serde(default)]
    pub agent_runtime: AgentRuntimeConfig,

    /// Script sandbox limits
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Plan runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Main task id used when a plan does not declare one
    #[serde(default = "default_main_task_id")]
    pub main_task_id: String,

    /// Upper bound on how long the loop sleeps before re-checking its queue
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-listener execution timeout
    #[serde(default = "default_listener_timeout_ms")]
    pub listener_timeout_ms: u64,

    /// Listeners run concurrently for one transition, at most this many at a time
    #[serde(default = "default_max_concurrent_listeners")]
    pub max_concurrent_listeners: usize,
}

fn default_main_task_id() -> String {
    "001".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_listener_timeout_ms() -> u64 {
    120_000
}

const fn default_max_concurrent_listeners() -> usize {
    8
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            main_task_id: default_main_task_id(),
            poll_interval_ms: default_poll_interval_ms(),
            listener_timeout_ms: default_listener_timeout_ms(),
            max_concurrent_listeners: default_max_concurrent_listeners(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Automatic retries per (plan instance, listener) before pausing for resume
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
}

const fn default_max_retry_count() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".conductor/conductor.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            retention_days: default_retention_days(),
            log_dir: None,
        }
    }
}

/// Remote agent runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentRuntimeConfig {
    /// Base URL of the agent runtime service
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,

    /// Transport-level retries for connection errors and 5xx responses
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_agent_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

const fn default_agent_timeout_secs() -> u64 {
    120
}

const fn default_max_transport_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            timeout_secs: default_agent_timeout_secs(),
            max_transport_retries: default_max_transport_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Script sandbox limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// Evaluation steps allowed per snippet
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Longest accepted snippet, in bytes
    #[serde(default = "default_max_source_len")]
    pub max_source_len: usize,
}

const fn default_max_steps() -> usize {
    10_000
}

const fn default_max_source_len() -> usize {
    64 * 1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_source_len: default_max_source_len(),
        }
    }
}
