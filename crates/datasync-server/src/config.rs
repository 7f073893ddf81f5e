//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::config::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default maximum upload size in bytes (100 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default storage disk recorded on blobs.
pub const DEFAULT_DISK: &str = "local";

/// Default rows per chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Default queue name.
pub const DEFAULT_QUEUE: &str = "default";

/// Default time a cached stop check stays valid.
pub const DEFAULT_STOP_CHECK_TTL_SECS: u64 = 10;

/// Default number of rows between counter flushes.
pub const DEFAULT_COUNTER_FLUSH_EVERY: u64 = 100;

/// Default concurrent work units per queue.
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 4;

/// Default attempts per work unit.
pub const DEFAULT_DISPATCH_MAX_ATTEMPTS: u32 = 3;

/// Default linear retry backoff in milliseconds.
pub const DEFAULT_DISPATCH_RETRY_BACKOFF_MS: u64 = 500;

/// Default scratch directory for sources, chunk artifacts and merges.
pub const DEFAULT_WORK_DIR: &str = "./storage/work";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub imports: ImportSettings,
    pub exports: ExportSettings,
    pub dispatch: DispatchSettings,
    pub work_dir: PathBuf,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

/// Database configuration; without a URL jobs are kept in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Import pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    pub disk: String,
    pub chunk_size: u64,
    pub queue: String,
    pub allow_failures: bool,
    pub stop_check_ttl: Duration,
    pub counter_flush_every: u64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            disk: DEFAULT_DISK.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue: DEFAULT_QUEUE.to_string(),
            allow_failures: true,
            stop_check_ttl: Duration::from_secs(DEFAULT_STOP_CHECK_TTL_SECS),
            counter_flush_every: DEFAULT_COUNTER_FLUSH_EVERY,
        }
    }
}

/// Export pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    pub disk: String,
    pub chunk_size: u64,
    pub queue: String,
    pub allow_failures: bool,
    /// Destination directory of published exports
    pub directory: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            disk: DEFAULT_DISK.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue: DEFAULT_QUEUE.to_string(),
            allow_failures: true,
            directory: None,
        }
    }
}

/// Background execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            max_attempts: DEFAULT_DISPATCH_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_DISPATCH_RETRY_BACKOFF_MS),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env_string("DATASYNC_HOST", DEFAULT_SERVER_HOST),
                port: env_or("DATASYNC_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "DATASYNC_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
                max_upload_bytes: env_or("DATASYNC_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            storage: StorageConfig::from_env()?,
            imports: ImportSettings {
                disk: env_string("IMPORT_DISK", DEFAULT_DISK),
                chunk_size: env_or("IMPORT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                queue: env_string("IMPORT_QUEUE", DEFAULT_QUEUE),
                allow_failures: env_or("IMPORT_ALLOW_FAILURES", true),
                stop_check_ttl: Duration::from_secs(env_or(
                    "IMPORT_STOP_CHECK_TTL",
                    DEFAULT_STOP_CHECK_TTL_SECS,
                )),
                counter_flush_every: env_or(
                    "IMPORT_COUNTER_FLUSH_EVERY",
                    DEFAULT_COUNTER_FLUSH_EVERY,
                ),
            },
            exports: ExportSettings {
                disk: env_string("EXPORT_DISK", DEFAULT_DISK),
                chunk_size: env_or("EXPORT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                queue: env_string("EXPORT_QUEUE", DEFAULT_QUEUE),
                allow_failures: env_or("EXPORT_ALLOW_FAILURES", true),
                directory: std::env::var("EXPORT_DIRECTORY").ok().filter(|d| !d.is_empty()),
            },
            dispatch: DispatchSettings {
                concurrency: env_or("DISPATCH_CONCURRENCY", DEFAULT_DISPATCH_CONCURRENCY),
                max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", DEFAULT_DISPATCH_MAX_ATTEMPTS),
                retry_backoff: Duration::from_millis(env_or(
                    "DISPATCH_RETRY_BACKOFF_MS",
                    DEFAULT_DISPATCH_RETRY_BACKOFF_MS,
                )),
            },
            work_dir: PathBuf::from(env_string("DATASYNC_WORK_DIR", DEFAULT_WORK_DIR)),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.imports.chunk_size == 0 || self.exports.chunk_size == 0 {
            anyhow::bail!("Chunk sizes must be greater than 0");
        }

        if self.imports.counter_flush_every == 0 {
            anyhow::bail!("Counter flush threshold must be greater than 0");
        }

        if self.dispatch.concurrency == 0 {
            anyhow::bail!("Dispatch concurrency must be greater than 0");
        }

        if self.dispatch.max_attempts == 0 {
            anyhow::bail!("Dispatch max_attempts must be at least 1");
        }

        self.storage.validate()?;

        if self.database.url.is_none() {
            tracing::warn!("DATABASE_URL not set - job records are kept in memory");
        }

        Ok(())
    }

    /// Settings handed to the sync pipeline
    pub fn sync_settings(&self) -> crate::sync::SyncSettings {
        crate::sync::SyncSettings {
            work_dir: self.work_dir.clone(),
            imports: self.imports.clone(),
            exports: self.exports.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            storage: StorageConfig::default(),
            imports: ImportSettings::default(),
            exports: ExportSettings::default(),
            dispatch: DispatchSettings::default(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
        }
    }
}
