//! Compiler configuration management
//!
//! Handles loading configuration from environment variables, TOML files, and CLI arguments.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rayon::ThreadPool;
use serde::Deserialize;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unknown graph build mode.
    #[error("Invalid graph build mode: {0}. Must be one of: sequential, parallel")]
    InvalidGraphBuildMode(String),

    /// Unknown log level.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Zero or unparsable worker thread count.
    #[error("Invalid worker thread count: {0}. Must be a positive integer")]
    InvalidWorkerThreads(String),

    /// Reading or parsing the TOML file failed.
    #[error("Configuration file error: {0}")]
    FileError(String),

    /// The worker pool could not be created.
    #[error("Executor error: {0}")]
    ExecutorError(String),
}

/// Log levels supported by the compiler binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-requirement resolution.
    Trace,
    /// Per-configuration progress.
    Debug,
    /// Compile phases.
    #[default]
    Info,
    /// Unresolved requirements.
    Warn,
    /// Failures only.
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

impl LogLevel {
    /// Convert log level to tracing filter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

/// How the graphs of a view's configurations are built relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBuildMode {
    /// One configuration at a time, in declaration order.
    #[default]
    Sequential,
    /// All configurations at once on the shared pool.
    Parallel,
}

impl FromStr for GraphBuildMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(GraphBuildMode::Sequential),
            "parallel" | "par" => Ok(GraphBuildMode::Parallel),
            _ => Err(ConfigError::InvalidGraphBuildMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for GraphBuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphBuildMode::Sequential => write!(f, "sequential"),
            GraphBuildMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Compiler configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Relative scheduling of configuration graph builds
    #[serde(deserialize_with = "deserialize_graph_build_mode")]
    pub graph_build_mode: GraphBuildMode,
    /// Add portfolio requirements one `(value name, constraints)` stripe at a
    /// time, waiting for the builder between stripes
    pub striped_portfolio_requirements: bool,
    /// Worker pool size; `None` uses one thread per logical CPU
    pub worker_threads: Option<usize>,
    /// Log level
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    LogLevel::from_str(&s).map_err(serde::de::Error::custom)
}

fn deserialize_graph_build_mode<'de, D>(deserializer: D) -> Result<GraphBuildMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    GraphBuildMode::from_str(&s).map_err(serde::de::Error::custom)
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            graph_build_mode: GraphBuildMode::Sequential,
            striped_portfolio_requirements: false,
            worker_threads: None,
            log_level: LogLevel::Info,
        }
    }
}

const ENV_GRAPH_BUILD_MODE: &str = "VIEWC_GRAPH_BUILD_MODE";
const ENV_STRIPED: &str = "VIEWC_STRIPED";
const ENV_WORKER_THREADS: &str = "VIEWC_WORKER_THREADS";
const ENV_LOG_LEVEL: &str = "VIEWC_LOG_LEVEL";

impl CompilerConfig {
    /// Create a new CompilerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var(ENV_GRAPH_BUILD_MODE) {
            config.graph_build_mode = GraphBuildMode::from_str(&mode)?;
        }

        if let Ok(striped) = std::env::var(ENV_STRIPED) {
            config.striped_portfolio_requirements = striped.to_lowercase() == "true";
        }

        if let Ok(threads) = std::env::var(ENV_WORKER_THREADS) {
            let parsed = threads
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidWorkerThreads(threads.clone()))?;
            config.worker_threads = Some(parsed);
        }

        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            config.log_level = LogLevel::from_str(&log_level)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = toml::from_str(content)
            .map_err(|e| ConfigError::FileError(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::InvalidWorkerThreads("0".to_string()));
        }
        Ok(())
    }

    /// Worker pool size after defaulting.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Builds the single pool shared by traversal, security resolution and graph building.
    pub fn build_executor(&self) -> Result<Arc<ThreadPool>, ConfigError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.effective_worker_threads())
            .thread_name(|index| format!("viewc-worker-{index}"))
            .build()
            .map(Arc::new)
            .map_err(|e| ConfigError::ExecutorError(e.to_string()))
    }

    /// Merge with CLI arguments (CLI takes precedence)
    ///
    /// Nothing is changed when an override fails to parse.
    pub fn merge_with_cli(&mut self, cli: &CliArgs) -> Result<(), ConfigError> {
        let graph_build_mode = cli
            .graph_build_mode
            .as_deref()
            .map(GraphBuildMode::from_str)
            .transpose()?;
        let log_level = cli.log_level.as_deref().map(LogLevel::from_str).transpose()?;

        if let Some(mode) = graph_build_mode {
            self.graph_build_mode = mode;
        }
        if let Some(striped) = cli.striped {
            self.striped_portfolio_requirements = striped;
        }
        if let Some(threads) = cli.worker_threads {
            self.worker_threads = Some(threads);
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        Ok(())
    }
}

/// CLI arguments structure
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Config file path
    pub config_file: Option<PathBuf>,
    /// Graph build mode override
    pub graph_build_mode: Option<String>,
    /// Striped portfolio requirements override
    pub striped: Option<bool>,
    /// Worker thread override
    pub worker_threads: Option<usize>,
    /// Log level override
    pub log_level: Option<String>,
}

/// Build configuration from all sources
///
/// Priority (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables
/// 3. Config file
/// 4. Default values
pub fn build_config(cli: &CliArgs) -> Result<CompilerConfig, ConfigError> {
    let mut config = if let Some(config_path) = &cli.config_file {
        CompilerConfig::from_file(config_path)?
    } else {
        CompilerConfig::default()
    };

    // only variables that are actually set override the file
    let env_config = CompilerConfig::from_env()?;
    if std::env::var(ENV_GRAPH_BUILD_MODE).is_ok() {
        config.graph_build_mode = env_config.graph_build_mode;
    }
    if std::env::var(ENV_STRIPED).is_ok() {
        config.striped_portfolio_requirements = env_config.striped_portfolio_requirements;
    }
    if std::env::var(ENV_WORKER_THREADS).is_ok() {
        config.worker_threads = env_config.worker_threads;
    }
    if std::env::var(ENV_LOG_LEVEL).is_ok() {
        config.log_level = env_config.log_level;
    }

    config.merge_with_cli(cli)?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert_eq!(config.graph_build_mode, GraphBuildMode::Sequential);
        assert!(!config.striped_portfolio_requirements);
        assert_eq!(config.worker_threads, None);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.effective_worker_threads() >= 1);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("Warn").unwrap(), LogLevel::Warn);
        assert!(LogLevel::from_str("verbose").is_err());
    }

    #[test]
    fn test_graph_build_mode_parsing() {
        assert_eq!(GraphBuildMode::from_str("parallel").unwrap(), GraphBuildMode::Parallel);
        assert_eq!(GraphBuildMode::from_str("SEQ").unwrap(), GraphBuildMode::Sequential);
        assert!(GraphBuildMode::from_str("eager").is_err());
        assert_eq!(GraphBuildMode::Parallel.to_string(), "parallel");
    }

    #[test]
    fn test_toml_parsing() {
        let config = CompilerConfig::from_toml_str(
            r#"
            graph_build_mode = "parallel"
            striped_portfolio_requirements = true
            worker_threads = 3
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.graph_build_mode, GraphBuildMode::Parallel);
        assert!(config.striped_portfolio_requirements);
        assert_eq!(config.effective_worker_threads(), 3);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CompilerConfig::from_toml_str("striped_portfolio_requirements = true").unwrap();
        assert_eq!(config.graph_build_mode, GraphBuildMode::Sequential);
        assert!(config.striped_portfolio_requirements);
    }

    #[test]
    fn test_zero_worker_threads_rejected() {
        assert!(matches!(
            CompilerConfig::from_toml_str("worker_threads = 0"),
            Err(ConfigError::InvalidWorkerThreads(_))
        ));
    }

    #[test]
    fn test_merge_with_cli() {
        let mut config = CompilerConfig::default();
        config
            .merge_with_cli(&CliArgs {
                graph_build_mode: Some("parallel".to_string()),
                striped: Some(true),
                worker_threads: Some(2),
                log_level: Some("warn".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.graph_build_mode, GraphBuildMode::Parallel);
        assert!(config.striped_portfolio_requirements);
        assert_eq!(config.worker_threads, Some(2));
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_cli_overrides_rejected() {
        let mut config = CompilerConfig::default();
        let err = config
            .merge_with_cli(&CliArgs {
                worker_threads: Some(2),
                log_level: Some("nonsense".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(level) if level == "nonsense"));
        // a rejected merge leaves the config untouched
        assert_eq!(config, CompilerConfig::default());

        let err = build_config(&CliArgs {
            graph_build_mode: Some("eager".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGraphBuildMode(_)));
    }

    #[test]
    fn test_build_executor_sizes_pool() {
        let config = CompilerConfig {
            worker_threads: Some(2),
            ..Default::default()
        };
        let pool = config.build_executor().unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
