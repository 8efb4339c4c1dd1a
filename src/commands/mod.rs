//! Command implementations for the Murmur CLI.
//!
//! This module contains the logic behind each CLI command. Commands are
//! organized by area:
//! - `graph` - profiles, relationships, rumors
//! - `feed` - posts, auto-posting, catch-up, the run loop
//!
//! Everything here returns a value implementing [`Output`]; `main` decides
//! whether it is printed as JSON or for humans.

mod feed;
mod graph;

pub use feed::*;
pub use graph::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{
    self, CONFIG_KEYS, ConfigOverrides, MurmurConfig, ResolvedConfig, load_config, save_config,
};
use crate::engine::{Engine, EngineOptions, LogRefresh};
use crate::llm::{CommandProvider, CompletionProvider, UnconfiguredProvider};
use crate::models::is_self;
use crate::profiles::ProfileSource;
use crate::storage::{BackendType, open_backend, resolve_data_dir};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

pub(crate) fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Everything a command needs: where the data lives, how it is configured,
/// and the wired services.
pub struct Context {
    pub data_dir: PathBuf,
    pub backend_type: BackendType,
    pub config: ResolvedConfig,
    pub engine: Engine,
}

impl Context {
    pub fn open(
        data_dir: Option<&Path>,
        backend_type: BackendType,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let data_dir = resolve_data_dir(data_dir)?;
        let config = config::resolve_from_dir(&data_dir, overrides)?;
        let backend = open_backend(backend_type, &data_dir)?;
        let provider: Arc<dyn CompletionProvider> = match config.provider_command() {
            Some(command) => Arc::new(CommandProvider::new(command)),
            None => Arc::new(UnconfiguredProvider),
        };
        let engine = Engine::new(
            backend,
            provider,
            Arc::new(LogRefresh),
            EngineOptions::from(&config),
        );
        Ok(Self {
            data_dir,
            backend_type,
            config,
            engine,
        })
    }

    /// Fail unless `id` is the operator or a known agent.
    pub fn require_node(&self, id: &str) -> Result<()> {
        if is_self(id) {
            return Ok(());
        }
        self.require_agent(id)
    }

    /// Fail unless `id` is a known agent.
    pub fn require_agent(&self, id: &str) -> Result<()> {
        match self.engine.profiles.profile(id)? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("agent {}", id))),
        }
    }
}

// === Status ===

#[derive(Serialize)]
pub struct StatusSummary {
    pub data_dir: PathBuf,
    pub backend: &'static str,
    pub agents: usize,
    pub edges: usize,
    pub posts: usize,
    pub auto_post_enabled: bool,
    pub provider: Option<String>,
}

impl Output for StatusSummary {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            "Murmur".to_string(),
            format!("  Data:      {} ({})", self.data_dir.display(), self.backend),
            format!("  Agents:    {}", self.agents),
            format!("  Edges:     {}", self.edges),
            format!("  Posts:     {}", self.posts),
            format!(
                "  Autopost:  {}",
                if self.auto_post_enabled { "on" } else { "off" }
            ),
        ];
        match self.provider {
            Some(ref cmd) => lines.push(format!("  Provider:  {}", cmd)),
            None => lines.push("  Provider:  (none, set provider-command)".to_string()),
        }
        lines.join("\n")
    }
}

/// Overview shown when `mur` runs without a subcommand.
pub fn status(ctx: &Context) -> Result<StatusSummary> {
    Ok(StatusSummary {
        data_dir: ctx.data_dir.clone(),
        backend: ctx.backend_type.as_str(),
        agents: ctx.engine.profiles.agent_ids()?.len(),
        edges: ctx.engine.relationships.list_edges()?.len(),
        posts: ctx.engine.posts.list_posts()?.len(),
        auto_post_enabled: ctx.engine.toggle.is_enabled(),
        provider: ctx.config.provider_command().map(str::to_string),
    })
}

// === Config ===

impl Output for ResolvedConfig {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!(
                "auto-post-enabled         {} ({})",
                self.auto_post_enabled.value, self.auto_post_enabled.source
            ),
            format!(
                "sweep-interval-secs       {} ({})",
                self.sweep_interval_secs.value, self.sweep_interval_secs.source
            ),
            format!("max-posts                 {} ({})", self.max_posts.value, self.max_posts.source),
            format!(
                "max-comment-rounds        {} ({})",
                self.max_comment_rounds.value, self.max_comment_rounds.source
            ),
            format!("temperature               {} ({})", self.temperature.value, self.temperature.source),
            format!(
                "max-pending-compensation  {} ({})",
                self.max_pending_compensation.value, self.max_pending_compensation.source
            ),
        ];
        match self.provider_command {
            Some(ref cmd) => lines.push(format!("provider-command          {} ({})", cmd.value, cmd.source)),
            None => lines.push("provider-command          (unset)".to_string()),
        }
        match self.seed {
            Some(ref seed) => lines.push(format!("seed                      {} ({})", seed.value, seed.source)),
            None => lines.push("seed                      (unset)".to_string()),
        }
        lines.join("\n")
    }
}

pub fn config_show(data_dir: Option<&Path>, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let data_dir = resolve_data_dir(data_dir)?;
    config::resolve_from_dir(&data_dir, overrides)
}

#[derive(Serialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: Option<serde_json::Value>,
}

impl Output for ConfigValue {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.value {
            Some(ref v) => format!("{} = {}", self.key, v),
            None => format!("{} is not set", self.key),
        }
    }
}

fn config_lookup(config: &MurmurConfig, key: &str) -> Result<Option<serde_json::Value>> {
    if !CONFIG_KEYS.contains(&key) {
        return Err(Error::InvalidInput(format!(
            "unknown config key '{}' (expected one of: {})",
            key,
            CONFIG_KEYS.join(", ")
        )));
    }
    let value = serde_json::to_value(config)?;
    Ok(value
        .get(key.replace('-', "_"))
        .filter(|v| !v.is_null())
        .cloned())
}

pub fn config_get(data_dir: Option<&Path>, key: &str) -> Result<ConfigValue> {
    let data_dir = resolve_data_dir(data_dir)?;
    let config = load_config(&data_dir)?;
    Ok(ConfigValue {
        key: key.to_string(),
        value: config_lookup(&config, key)?,
    })
}

pub fn config_set(data_dir: Option<&Path>, key: &str, value: &str) -> Result<ConfigValue> {
    let data_dir = resolve_data_dir(data_dir)?;
    let mut config = load_config(&data_dir)?;
    config.set(key, value).map_err(Error::Config)?;
    save_config(&data_dir, &config)?;
    Ok(ConfigValue {
        key: key.to_string(),
        value: config_lookup(&config, key)?,
    })
}

// === Version ===

#[derive(Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub built: &'static str,
}

impl Output for VersionInfo {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Version: {}\nCommit:  {}\nBuilt:   {}",
            self.version, self.commit, self.built
        )
    }
}

pub fn version() -> VersionInfo {
    VersionInfo {
        version: crate::cli::package_version(),
        commit: crate::cli::git_commit(),
        built: crate::cli::build_timestamp(),
    }
}

/// Generic result for removals.
#[derive(Serialize)]
pub struct Removed {
    pub kind: &'static str,
    pub id: String,
    pub removed: bool,
}

impl Output for Removed {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.removed {
            format!("Removed {} {}", self.kind, self.id)
        } else {
            format!("No {} {} to remove", self.kind, self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> Context {
        Context::open(Some(dir.path()), BackendType::Sqlite, &ConfigOverrides::new()).unwrap()
    }

    #[test]
    fn test_status_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let summary = status(&ctx(&dir)).unwrap();
        assert_eq!(summary.agents, 0);
        assert_eq!(summary.posts, 0);
        assert!(!summary.auto_post_enabled);
        assert!(summary.to_json().contains("\"backend\":\"sqlite\""));
        assert!(dir.path().join("murmur.db").exists());
    }

    #[test]
    fn test_config_set_then_get() {
        let dir = TempDir::new().unwrap();
        let set = config_set(Some(dir.path()), "max-posts", "25").unwrap();
        assert_eq!(set.value, Some(serde_json::json!(25)));

        let got = config_get(Some(dir.path()), "max-posts").unwrap();
        assert_eq!(got.value, Some(serde_json::json!(25)));
        assert!(config_get(Some(dir.path()), "seed").unwrap().value.is_none());
        assert!(config_get(Some(dir.path()), "nope").is_err());

        let resolved = config_show(Some(dir.path()), &ConfigOverrides::new()).unwrap();
        assert_eq!(resolved.max_posts.value, 25);
        assert!(resolved.to_human().contains("25 (config)"));
    }

    #[test]
    fn test_invalid_config_value_is_not_saved() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            config_set(Some(dir.path()), "sweep-interval-secs", "10"),
            Err(Error::Config(_))
        ));
        assert!(!dir.path().join("config.kdl").exists());
    }

    #[test]
    fn test_require_node() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        assert!(ctx.require_node("self").is_ok());
        assert!(matches!(ctx.require_node("ghost"), Err(Error::NotFound(_))));
    }
}
