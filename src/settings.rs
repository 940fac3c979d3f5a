//! Configuration of the persistence engine.
//!
//! Settings are read from an optional TOML file, `eavstore.toml` unless a
//! path is given, and then from environment variables prefixed `EAVSTORE_`.
//! Nested keys use a double underscore, so `EAVSTORE_DATABASE__HOST=/var/lib/eav`
//! sets `database.host`. Every key has a default.
//!
//! ```toml
//! bulk_write_threshold = 1000
//! attribute_cache_max = 10000
//!
//! [database]
//! # "memory" keeps everything in an in-memory database
//! host = "/var/lib/eavstore"
//! name = "flame"
//!
//! [lock]
//! max_attempts = 50
//! lease_ms = 30000
//! ```

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::buffer::DEFAULT_BUFFER_WRITE_THRESHOLD;
use crate::error::Result;
use crate::persist::PersistenceMode;
use crate::retrieve::MAX_LIMIT;

pub const CONFIG_FILE_NAME: &str = "eavstore.toml";
pub const ENV_PREFIX: &str = "EAVSTORE";
/// The host that selects an in-memory database.
pub const MEMORY_HOST: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: MEMORY_HOST.to_owned(),
            name: "flame".to_owned(),
        }
    }
}

/// How the store-wide lock is taken.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// A holder that has not released after this long is presumed dead.
    pub lease_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial_backoff_ms: 5,
            max_backoff_ms: 500,
            lease_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub bulk_write_threshold: usize,
    pub attribute_cache_max: usize,
    pub max_result_limit: usize,
    pub allocation_retries: u32,
    pub lock: LockSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            bulk_write_threshold: DEFAULT_BUFFER_WRITE_THRESHOLD,
            attribute_cache_max: 10_000,
            max_result_limit: MAX_LIMIT,
            allocation_retries: 5,
            lock: LockSettings::default(),
        }
    }
}

impl Settings {
    /// Layers the environment over the file. An explicitly named file must
    /// exist, the default one may be absent.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path.unwrap_or(CONFIG_FILE_NAME)).required(path.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        if self.database.host == MEMORY_HOST {
            PersistenceMode::InMemory
        } else {
            let host = self.database.host.trim_end_matches('/');
            PersistenceMode::File(format!("{}/{}.sqlite", host, self.database.name))
        }
    }
}
