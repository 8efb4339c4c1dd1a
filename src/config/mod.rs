//! Configuration for Murmur.
//!
//! ## config.kdl - Engine tuning
//!
//! Located at `<data-dir>/config.kdl`, next to `murmur.db`.
//!
//! Contains:
//! - `auto-post-enabled` - Global toggle for autonomous posting
//! - `sweep-interval-secs` - Auto-post loop cadence (minimum 180)
//! - `max-posts` - Feed retention
//! - `max-comment-rounds` - Comment round cap per thread
//! - `temperature` - Language-model sampling temperature
//! - `max-pending-compensation` - Compensation queue bound per agent
//! - `provider-command` - Shell command used as the language model
//! - `seed` - Fixed RNG seed
//!
//! ## Precedence
//!
//! CLI flag > env var (provider command only) > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

use std::path::{Path, PathBuf};

use kdl::KdlDocument;

use crate::{Error, Result};

pub use resolver::{
    ConfigOverrides, PROVIDER_COMMAND_ENV, Resolved, ResolvedConfig, ValueSource, resolve_config,
};
pub use schema::{CONFIG_KEYS, MIN_SWEEP_INTERVAL_SECS, MurmurConfig};

pub const CONFIG_FILE: &str = "config.kdl";

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Read config.kdl from the data directory; a missing file is an empty config.
pub fn load_config(data_dir: &Path) -> Result<MurmurConfig> {
    let path = config_path(data_dir);
    if !path.exists() {
        return Ok(MurmurConfig::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e)))?;
    Ok(MurmurConfig::from_kdl(&doc))
}

/// Validate and write config.kdl into the data directory.
pub fn save_config(data_dir: &Path, config: &MurmurConfig) -> Result<()> {
    config.validate().map_err(Error::Config)?;
    std::fs::create_dir_all(data_dir)?;
    let mut doc = config.to_kdl();
    doc.autoformat();
    std::fs::write(config_path(data_dir), doc.to_string())?;
    Ok(())
}

/// Load config.kdl and resolve it against CLI overrides and the environment.
pub fn resolve_from_dir(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let file = load_config(data_dir)?;
    resolve_config(&file, overrides, std::env::var(PROVIDER_COMMAND_ENV).ok())
}
