use serde::{Deserialize, Serialize};

/// Main configuration structure for remedy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Phase coordinator limits
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Complexity trend classification
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Recovery strategy guards
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Reliability telemetry
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Execution sandbox
    #[serde(default)]
    pub sandbox: SandboxConfig,
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
    ".remedy/remedy.db".to_string()
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

impl DatabaseConfig {
    /// `sqlx` connection URL for the configured path
    pub fn url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite:{}", self.path)
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

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
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
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Phase coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Iteration cap; the run fails once the count exceeds it
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Timeout for each collaborator call (seconds)
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,

    /// Consecutive diverging samples before loop recovery kicks in
    #[serde(default = "default_divergence_limit")]
    pub divergence_limit: u32,

    /// Whether non-atomic problems are offered to the decomposition provider
    #[serde(default = "default_true")]
    pub enable_decomposition: bool,

    /// Largest decomposition graph accepted
    #[serde(default = "default_max_dag_nodes")]
    pub max_dag_nodes: usize,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_phase_timeout_secs() -> u64 {
    300
}

const fn default_divergence_limit() -> u32 {
    2
}

const fn default_true() -> bool {
    true
}

const fn default_max_dag_nodes() -> usize {
    64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            phase_timeout_secs: default_phase_timeout_secs(),
            divergence_limit: default_divergence_limit(),
            enable_decomposition: true,
            max_dag_nodes: default_max_dag_nodes(),
        }
    }
}

/// Complexity trend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// Number of trailing samples considered
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Adjacent samples closer than this count as stable
    #[serde(default = "default_stability_epsilon")]
    pub stability_epsilon: f64,

    /// Scores below this can be atomic
    #[serde(default = "default_atomic_threshold")]
    pub atomic_threshold: f64,
}

const fn default_window_size() -> usize {
    3
}

const fn default_stability_epsilon() -> f64 {
    0.5
}

const fn default_atomic_threshold() -> f64 {
    5.0
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            stability_epsilon: default_stability_epsilon(),
            atomic_threshold: default_atomic_threshold(),
        }
    }
}

/// Recovery strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryConfig {
    /// `reduce-scope` is only tried above this complexity
    #[serde(default = "default_reduce_scope_threshold")]
    pub reduce_scope_complexity_threshold: f64,

    /// `regenerate` is only tried below this iteration
    #[serde(default = "default_regenerate_max_iteration")]
    pub regenerate_max_iteration: u32,

    /// Order non-terminal strategies by historical success rate
    #[serde(default)]
    pub prefer_proven_strategies: bool,

    /// How many historical strategies to fetch
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

const fn default_reduce_scope_threshold() -> f64 {
    15.0
}

const fn default_regenerate_max_iteration() -> u32 {
    5
}

const fn default_history_limit() -> usize {
    5
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            reduce_scope_complexity_threshold: default_reduce_scope_threshold(),
            regenerate_max_iteration: default_regenerate_max_iteration(),
            prefer_proven_strategies: false,
            history_limit: default_history_limit(),
        }
    }
}

/// Reliability telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    /// Bounded write queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Events older than this are removed by the retention sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Window used for threshold analysis
    #[serde(default = "default_analysis_window_days")]
    pub analysis_window_days: u32,
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_analysis_window_days() -> u32 {
    7
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            retention_days: default_retention_days(),
            analysis_window_days: default_analysis_window_days(),
        }
    }
}

/// Sandbox backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Commands run on the host inside a working directory
    #[default]
    Local,
    /// Simulation backend: nothing is executed
    Noop,
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,

    /// Working directory for the local sandbox
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

fn default_workdir() -> String {
    ".".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            workdir: default_workdir(),
        }
    }
}
