//! Engine configuration.
//!
//! Layered loading:
//! 1. Defaults in code
//! 2. Optional `stockledger.toml` in the working directory
//! 3. Environment overrides with the `STOCKLEDGER__` prefix, e.g.
//!    `STOCKLEDGER__LOCK_TIMEOUT_MS=250` or `STOCKLEDGER__DATABASE__URL=postgres://...`
//!
//! A `.env` file, when present, is loaded into the environment first. A missing
//! file is fine; an unreadable or malformed one fails the load.

use std::path::PathBuf;
use std::time::Duration;

use config::{Environment, File};
use serde::Deserialize;

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Longest wait for a bucket lock before the operation fails with `LockTimeout`.
    pub lock_timeout_ms: u64,

    /// PostgreSQL backend, when one is used.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            database: None,
        }
    }
}

impl EngineConfig {
    pub fn load() -> StoreResult<Self> {
        load_dotenv(dotenvy::dotenv())?;

        let config = config::Config::builder()
            .set_default("lock_timeout_ms", DEFAULT_LOCK_TIMEOUT_MS)?
            .add_source(File::with_name("stockledger").required(false))
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

fn load_dotenv(result: Result<PathBuf, dotenvy::Error>) -> StoreResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(StoreError::Config(format!(".env: {e}"))),
    }
}
