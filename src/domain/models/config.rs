use serde::{Deserialize, Serialize};

/// Main configuration structure for conductor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Directory holding one execution state document per attempt
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-target lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Preflight gate configuration
    #[serde(default)]
    pub preflight: PreflightConfig,

    /// Fix-loop bounds for retryable phases
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backoff for eventually consistent confirmations
    #[serde(default)]
    pub verification: VerificationConfig,

    /// External phase executor process
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Issue/PR provider
    #[serde(default)]
    pub github: GithubConfig,
}

fn default_state_dir() -> String {
    ".conductor/state".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            state_dir: default_state_dir(),
            logging: LoggingConfig::default(),
            lock: LockConfig::default(),
            preflight: PreflightConfig::default(),
            retry: RetryConfig::default(),
            verification: VerificationConfig::default(),
            executor: ExecutorConfig::default(),
            github: GithubConfig::default(),
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

    /// Directory for rolling log files. Stdout only when unset.
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// How long a lock is held across phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Acquire once, hold across every phase of the attempt.
    #[default]
    PerAttempt,
    /// Acquire and release around each phase.
    PerPhase,
}

/// Lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_minutes")]
    pub ttl_minutes: u64,

    #[serde(default)]
    pub scope: LockScope,
}

const fn default_lock_ttl_minutes() -> u64 {
    120
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_lock_ttl_minutes(),
            scope: LockScope::default(),
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_minutes * 60)
    }
}

/// Preflight configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PreflightConfig {
    /// Minutes since the last posted status marker before a new attempt may start
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

const fn default_cooldown_minutes() -> u64 {
    60
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

/// Retry loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    #[serde(default = "default_loop_attempts")]
    pub test_max_attempts: u32,

    #[serde(default = "default_loop_attempts")]
    pub lint_max_attempts: u32,
}

const fn default_loop_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            test_max_attempts: default_loop_attempts(),
            lint_max_attempts: default_loop_attempts(),
        }
    }
}

/// Verification backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerificationConfig {
    #[serde(default = "default_verification_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

const fn default_verification_attempts() -> u32 {
    5
}

const fn default_base_delay_secs() -> u64 {
    2
}

const fn default_max_delay_secs() -> u64 {
    32
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_verification_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Phase executor process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Program invoked once per phase
    #[serde(default = "default_executor_command")]
    pub command: String,

    /// Extra arguments placed before the phase arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Ceiling for a single phase run
    #[serde(default = "default_executor_timeout")]
    pub timeout_minutes: u64,

    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_executor_command() -> String {
    "conductor-agent".to_string()
}

const fn default_executor_timeout() -> u64 {
    60
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: default_executor_command(),
            args: vec![],
            timeout_minutes: default_executor_timeout(),
            working_dir: None,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_minutes * 60)
    }
}

/// GitHub provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GithubConfig {
    /// Repository as `owner/name`. Provider is disabled when unset.
    #[serde(default)]
    pub repo: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Login that posts status comments; used to find our own markers
    #[serde(default)]
    pub actor: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            api_url: default_api_url(),
            token_env: default_token_env(),
            actor: None,
        }
    }
}
