pub mod archive;
pub mod audit;
pub mod catalog;
mod codec;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod indexer;
pub mod model;
pub mod search;
pub mod setops;
pub mod storage;
pub mod streams;
pub mod validate;
pub mod vault;
pub mod version;

pub use config::VaultConfig;
pub use error::{Error, Result};
pub use vault::Vault;
