//! Durable store for cinderbox's control-plane records.
//!
//! This crate provides the persistent data model:
//! - Users, their credentials, and API keys
//! - Sandboxes and their container bindings
//!
//! The store is a single-writer SQLite database; at the scale of tens to
//! thousands of sandboxes per host that is all the durability layer needs.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use models::{SandboxRow, UserRow};
pub use repos::{SandboxRepo, UserRepo};
pub use store::{RegistryStore, SqliteStore};

use cinderbox_core::config::RegistryConfig;
use std::sync::Arc;

/// Create a registry store from configuration.
pub async fn from_config(config: &RegistryConfig) -> RegistryResult<Arc<dyn RegistryStore>> {
    let store = SqliteStore::new(&config.persist_path).await?;
    Ok(Arc::new(store) as Arc<dyn RegistryStore>)
}
