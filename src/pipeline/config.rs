//! Pipeline configuration.
//!
//! This module provides configuration options for the processing pipeline:
//! worker pool sizing, queue and lease timing, backend connection URLs and
//! the manifest output directory.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the processing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Worker settings
    /// Number of worker tasks pulling from the queue.
    pub num_workers: usize,
    /// How long a worker's dequeue blocks before re-checking for shutdown.
    pub poll_interval: Duration,
    /// Timeout for graceful pool shutdown.
    pub shutdown_timeout: Duration,

    // Queue settings
    /// Logical queue name (Redis key prefix).
    pub queue_name: String,
    /// How long a dequeued item stays leased before it can be redelivered.
    pub lease_ttl: Duration,
    /// How often expired leases are swept back to the ready queue.
    pub sweep_interval: Duration,

    // Executor settings
    /// Delay between simulated progress steps.
    pub step_delay: Duration,
    /// Progress increment per simulated step.
    pub step_size: u8,

    // Backend settings
    /// PostgreSQL database connection URL.
    pub database_url: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// Directory manifest documents are written to.
    pub manifest_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Worker defaults
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),

            // Queue defaults
            queue_name: "volusphere:work".to_string(),
            lease_ttl: Duration::from_secs(300), // 5 minutes
            sweep_interval: Duration::from_secs(30),

            // Executor defaults
            step_delay: Duration::from_millis(350),
            step_size: 20,

            // Backend defaults
            database_url: "postgres://localhost/volusphere".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            manifest_path: PathBuf::from("./manifests"),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `VOLUSPHERE_NUM_WORKERS`: Worker task count (default: 4)
    /// - `VOLUSPHERE_POLL_INTERVAL_SECS`: Dequeue poll interval (default: 1)
    /// - `VOLUSPHERE_SHUTDOWN_TIMEOUT_SECS`: Graceful shutdown timeout (default: 60)
    /// - `VOLUSPHERE_QUEUE_NAME`: Queue name (default: volusphere:work)
    /// - `VOLUSPHERE_LEASE_TTL_SECS`: Lease time-to-live (default: 300)
    /// - `VOLUSPHERE_SWEEP_INTERVAL_SECS`: Lease sweep interval (default: 30)
    /// - `VOLUSPHERE_STEP_DELAY_MS`: Simulated step delay (default: 350)
    /// - `VOLUSPHERE_STEP_SIZE`: Simulated step size (default: 20)
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `REDIS_URL`: Redis connection URL (required)
    /// - `VOLUSPHERE_MANIFEST_PATH`: Manifest output directory (default: ./manifests)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Worker settings
        if let Ok(val) = std::env::var("VOLUSPHERE_NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "VOLUSPHERE_NUM_WORKERS")?;
        }

        if let Ok(val) = std::env::var("VOLUSPHERE_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "VOLUSPHERE_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("VOLUSPHERE_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "VOLUSPHERE_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        // Queue settings
        if let Ok(val) = std::env::var("VOLUSPHERE_QUEUE_NAME") {
            config.queue_name = val;
        }

        if let Ok(val) = std::env::var("VOLUSPHERE_LEASE_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "VOLUSPHERE_LEASE_TTL_SECS")?;
            config.lease_ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("VOLUSPHERE_SWEEP_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "VOLUSPHERE_SWEEP_INTERVAL_SECS")?;
            config.sweep_interval = Duration::from_secs(secs);
        }

        // Executor settings
        if let Ok(val) = std::env::var("VOLUSPHERE_STEP_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "VOLUSPHERE_STEP_DELAY_MS")?;
            config.step_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("VOLUSPHERE_STEP_SIZE") {
            config.step_size = parse_env_value(&val, "VOLUSPHERE_STEP_SIZE")?;
        }

        // Backend settings - connection URLs are required
        config.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        config.redis_url = std::env::var("REDIS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?;

        if let Ok(val) = std::env::var("VOLUSPHERE_MANIFEST_PATH") {
            config.manifest_path = PathBuf::from(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.queue_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        if self.lease_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "lease_ttl must be greater than 0".to_string(),
            ));
        }

        if self.lease_ttl <= self.sweep_interval {
            return Err(ConfigError::ValidationFailed(
                "lease_ttl must exceed sweep_interval".to_string(),
            ));
        }

        if self.step_size == 0 || self.step_size > 100 {
            return Err(ConfigError::ValidationFailed(
                "step_size must be between 1 and 100".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the number of workers.
    pub fn with_num_workers(mut self, num: usize) -> Self {
        self.num_workers = num;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builder method to set the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Builder method to set the lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Builder method to set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Builder method to set the simulated step delay.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Builder method to set the simulated step size.
    pub fn with_step_size(mut self, size: u8) -> Self {
        self.step_size = size;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the manifest output directory.
    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = path.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.queue_name, "volusphere:work");
        assert_eq!(config.lease_ttl, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.step_delay, Duration::from_millis(350));
        assert_eq!(config.step_size, 20);
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_num_workers(8)
            .with_poll_interval(Duration::from_millis(250))
            .with_queue_name("test:work")
            .with_lease_ttl(Duration::from_secs(60))
            .with_sweep_interval(Duration::from_secs(5))
            .with_step_delay(Duration::from_millis(1))
            .with_step_size(50)
            .with_database_url("postgres://test/db")
            .with_redis_url("redis://test:6379")
            .with_manifest_path("/tmp/manifests");

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.queue_name, "test:work");
        assert_eq!(config.lease_ttl, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.step_size, 50);
        assert_eq!(config.database_url, "postgres://test/db");
        assert_eq!(config.redis_url, "redis://test:6379");
        assert_eq!(config.manifest_path, PathBuf::from("/tmp/manifests"));
    }

    #[test]
    fn test_validation_valid_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_workers() {
        let config = PipelineConfig::default().with_num_workers(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("num_workers"));
    }

    #[test]
    fn test_validation_empty_queue_name() {
        let config = PipelineConfig::default().with_queue_name("");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("queue_name"));
    }

    #[test]
    fn test_validation_lease_ttl_below_sweep_interval() {
        let config = PipelineConfig::default()
            .with_lease_ttl(Duration::from_secs(10))
            .with_sweep_interval(Duration::from_secs(30));
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("lease_ttl must exceed"));
    }

    #[test]
    fn test_validation_step_size_out_of_range() {
        assert!(PipelineConfig::default()
            .with_step_size(0)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_step_size(101)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_step_size(100)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validation_empty_urls() {
        assert!(PipelineConfig::default()
            .with_database_url("")
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_redis_url("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let parsed: usize = parse_env_value("42", "TEST").unwrap();
        assert_eq!(parsed, 42);

        let result: Result<usize, _> = parse_env_value("not-a-number", "TEST");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("TEST"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("DATABASE_URL".to_string());
        assert!(err.to_string().contains("DATABASE_URL"));

        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));
    }
}
