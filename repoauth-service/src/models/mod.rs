pub mod access_grant;
pub mod account;
pub mod application;
pub mod developer_key;

pub use access_grant::{AccessGrant, NewAccessGrant};
pub use account::{
    generate_token, Account, AccountId, AccountKind, FacebookLink, NewAccount, TwitterLink,
};
pub use application::{Application, NewApplication};
pub use developer_key::{DeveloperKey, NewDeveloperKey};
