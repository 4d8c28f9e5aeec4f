pub mod access;
pub mod credentials;
pub mod database;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod store;

pub use access::AccessAuthorizer;
pub use credentials::CredentialVerifier;
pub use database::Database;
pub use error::ServiceError;
pub use memory::MemoryStore;
pub use store::{IdentityReader, IdentityWriter, StoreError};
