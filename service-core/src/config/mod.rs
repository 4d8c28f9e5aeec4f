use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::net::SocketAddr;

/// Listener settings shared by every service.
///
/// Read from an optional `configuration` file and from `APP__*`
/// environment variables (for example `APP__PORT`, `APP__GRPC_PORT`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// HTTP port for health checks and metrics.
    #[serde(default = "default_port")]
    pub port: u16,
    /// gRPC port for the RPC surface.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
}

fn default_port() -> u16 {
    8080
}

fn default_grpc_port() -> u16 {
    7911
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            grpc_port: default_grpc_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.grpc_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_well_known_ports() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.grpc_port, 7911);
        assert_eq!(config.grpc_addr().port(), 7911);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = Cfg::builder()
            .set_override("port", 9000)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.grpc_port, 7911);
    }
}
