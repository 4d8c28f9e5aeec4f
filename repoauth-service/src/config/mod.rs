use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct RepoAuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// OTLP collector endpoint; span export is off when unset.
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Tokio worker threads serving RPCs.
    pub worker_threads: usize,
    /// Requests dispatched concurrently across all connections.
    pub max_in_flight: usize,
    /// How long in-flight requests may run after shutdown starts.
    pub shutdown_drain_seconds: u64,
    /// Serve the gRPC reflection service.
    pub reflection: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_in_flight: service_core::grpc::DEFAULT_MAX_IN_FLIGHT,
            shutdown_drain_seconds: 30,
            reflection: true,
        }
    }
}

impl RepoAuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build from `common` plus values returned by `lookup`, then validate.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server = ServerConfig::default();
        let mut common = common;
        common.grpc_port = parse_value(&lookup, "GRPC_PORT", common.grpc_port)?;

        let config = RepoAuthConfig {
            common,
            service_name: get("SERVICE_NAME", "repoauth-service"),
            service_version: get("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            log_level: get("LOG_LEVEL", "info"),
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|v| !v.is_empty()),
            store: parse_value(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?,
            database: DatabaseConfig {
                url: get("DATABASE_URL", ""),
                max_connections: parse_value(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_value(&lookup, "DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout_seconds: parse_value(
                    &lookup,
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                    5,
                )?,
            },
            server: ServerConfig {
                worker_threads: parse_value(&lookup, "WORKER_THREADS", server.worker_threads)?,
                max_in_flight: parse_value(&lookup, "MAX_IN_FLIGHT", server.max_in_flight)?,
                shutdown_drain_seconds: parse_value(
                    &lookup,
                    "SHUTDOWN_DRAIN_SECONDS",
                    server.shutdown_drain_seconds,
                )?,
                reflection: parse_value(&lookup, "GRPC_REFLECTION", server.reflection)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.common.grpc_port == 0 {
            return Err(config_error("GRPC_PORT must be greater than 0"));
        }

        if self.server.worker_threads == 0 {
            return Err(config_error("WORKER_THREADS must be greater than 0"));
        }

        if self.server.max_in_flight == 0 {
            return Err(config_error("MAX_IN_FLIGHT must be greater than 0"));
        }

        if self.store == StoreBackend::Postgres {
            if self.database.url.is_empty() {
                return Err(config_error(
                    "DATABASE_URL is required when STORE_BACKEND=postgres",
                ));
            }

            if self.database.max_connections == 0 {
                return Err(config_error("DATABASE_MAX_CONNECTIONS must be greater than 0"));
            }

            if self.database.min_connections > self.database.max_connections {
                return Err(config_error(
                    "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS",
                ));
            }

            if self.database.acquire_timeout_seconds == 0 {
                return Err(config_error(
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

fn parse_value<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| config_error(&format!("{} is invalid: {}", key, e))),
        None => Ok(default),
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
