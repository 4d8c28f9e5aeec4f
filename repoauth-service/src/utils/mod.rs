pub mod password;

pub use password::{hash_password, is_well_formed, verify_password, Password, PasswordHashString};
