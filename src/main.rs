//! Loads entities from a JSON file into the configured store.
//!
//! Usage: `eavstore <entities.json> [config.toml]`
//!
//! The file holds an array of entities as serialized by
//! [`eavstore::construct::Entity`]. Set `RUST_LOG` to control logging.

use std::fs;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eavstore::construct::Entity;
use eavstore::engine::PersistenceEngine;
use eavstore::error::{EavError, Result};
use eavstore::settings::Settings;

fn load(path: &str, config: Option<&str>) -> Result<(usize, usize)> {
    let settings = Settings::load(config)?;
    let body = fs::read_to_string(path).map_err(|e| EavError::Config(format!("cannot read '{}': {}", path, e)))?;
    let entities: Vec<Entity> = serde_json::from_str(&body)?;
    let engine = PersistenceEngine::open(&settings)?;
    let saved = engine.save_all(&entities);
    engine.close()?;
    Ok((entities.len(), saved))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(path) = args.first() else {
        error!("usage: eavstore <entities.json> [config.toml]");
        return ExitCode::FAILURE;
    };
    match load(path, args.get(1).map(String::as_str)) {
        Ok((read, saved)) => {
            info!(read, saved, failed = read - saved, "load complete");
            if saved == read { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Err(e) => {
            error!(error = %e, "load failed");
            ExitCode::FAILURE
        }
    }
}
