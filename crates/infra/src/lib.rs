//! Infrastructure layer: stock storage, locking, posting and recomputation.
//!
//! [`InventoryEngine`] is the thread-safe in-memory implementation;
//! [`PgInventoryStore`] runs the same checks against PostgreSQL.

pub mod config;
pub mod engine;
pub mod error;
pub mod posting;
pub mod postgres;
pub mod recompute;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{DatabaseConfig, EngineConfig};
pub use engine::InventoryEngine;
pub use error::{StoreError, StoreResult};
pub use posting::LedgerPoster;
pub use postgres::PgInventoryStore;
