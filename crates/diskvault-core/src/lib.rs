//! Core building blocks shared by diskvault binaries.
//!
//! Keystore lifecycle, keyfile custody, partition planning, and attach/detach
//! orchestration live here so downstream crates can focus on operator
//! surfaces instead of reimplementing transaction handling.

pub mod backup;
pub mod config;
pub mod error;
pub mod keyfile;
pub mod keystore;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod rng;
pub mod session;
pub mod workflow;

pub use config::{CryptoCfg, DiskCfg, KeystoreCfg, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use keystore::{KeystoreHandle, KeystoreManager, KeystoreMode};
pub use provider::Host;
pub use session::Session;
