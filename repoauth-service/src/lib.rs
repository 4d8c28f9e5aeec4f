//! repoauth-service: password checks and repository ownership decisions
//! for source-control front ends, served over gRPC.

pub mod config;
pub mod db;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
