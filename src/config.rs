use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration, loaded once at startup and treated as immutable
/// thereafter. Grounded on `pdf_service::config::Config`'s layered
/// `config`-crate loader, generalized from a single `config/default.toml` +
/// `PDF_SERVICE__` prefix to this service's own file and `IMPOSE__` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub concurrency: ConcurrencyConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub fair_scheduling: bool,
    pub cleanup_interval_hours: u64,
    pub retention_hours: u64,
    pub soft_time_limit_seconds: u64,
    pub hard_time_limit_seconds: u64,
    pub drain_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size: u64,
    pub max_total_input_bytes: u64,
    pub max_files_per_upload: usize,
    pub zip_max_ratio: f64,
    pub zip_max_total_bytes: u64,
}

impl Config {
    /// Loads `config/default.toml` relative to the current working
    /// directory if present, then layers `IMPOSE__SECTION__FIELD`
    /// environment variables (double underscore as the nesting separator) on
    /// top.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if std::path::Path::new("config/default.toml").exists() {
            builder = builder.add_source(config::File::with_name("config/default"));
        }
        builder = builder.add_source(config::Environment::with_prefix("IMPOSE").separator("__"));
        builder.build()?.try_deserialize()
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.concurrency.cleanup_interval_hours * 3600)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.concurrency.retention_hours * 3600)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.concurrency.soft_time_limit_seconds)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.concurrency.hard_time_limit_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.drain_timeout_seconds)
    }
}
