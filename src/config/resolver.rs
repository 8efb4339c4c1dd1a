//! Precedence resolution for engine settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variable (`MURMUR_PROVIDER_COMMAND`, provider command only)
//! 3. config.kdl in the data directory
//! 4. Built-in defaults

use std::time::Duration;

use serde::Serialize;

use crate::config::schema::{
    DEFAULT_MAX_COMMENT_ROUNDS, DEFAULT_MAX_PENDING_COMPENSATION, DEFAULT_MAX_POSTS,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_TEMPERATURE, MurmurConfig,
};
use crate::{Error, Result};

/// Environment variable that overrides the configured provider command.
pub const PROVIDER_COMMAND_ENV: &str = "MURMUR_PROVIDER_COMMAND";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }

    fn default_value(value: T) -> Self {
        Self::new(value, ValueSource::Default)
    }
}

/// Pick the highest-precedence value among CLI flag, config file, and default.
fn pick<T: Clone>(cli: Option<T>, file: Option<T>, default: T) -> Resolved<T> {
    match (cli, file) {
        (Some(v), _) => Resolved::new(v, ValueSource::CliFlag),
        (None, Some(v)) => Resolved::new(v, ValueSource::ConfigFile),
        (None, None) => Resolved::default_value(default),
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub auto_post_enabled: Resolved<bool>,
    pub sweep_interval_secs: Resolved<u64>,
    pub max_posts: Resolved<usize>,
    pub max_comment_rounds: Resolved<usize>,
    pub temperature: Resolved<f64>,
    pub max_pending_compensation: Resolved<usize>,
    pub provider_command: Option<Resolved<String>>,
    pub seed: Option<Resolved<u64>>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            auto_post_enabled: Resolved::default_value(false),
            sweep_interval_secs: Resolved::default_value(DEFAULT_SWEEP_INTERVAL_SECS),
            max_posts: Resolved::default_value(DEFAULT_MAX_POSTS),
            max_comment_rounds: Resolved::default_value(DEFAULT_MAX_COMMENT_ROUNDS),
            temperature: Resolved::default_value(DEFAULT_TEMPERATURE),
            max_pending_compensation: Resolved::default_value(DEFAULT_MAX_PENDING_COMPENSATION),
            provider_command: None,
            seed: None,
        }
    }
}

impl ResolvedConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.value)
    }

    pub fn provider_command(&self) -> Option<&str> {
        self.provider_command.as_ref().map(|r| r.value.as_str())
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed.as_ref().map(|r| r.value)
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub auto_post_enabled: Option<bool>,
    pub provider_command: Option<String>,
    pub seed: Option<u64>,
    pub max_comment_rounds: Option<usize>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_post_enabled(mut self, enabled: bool) -> Self {
        self.auto_post_enabled = Some(enabled);
        self
    }

    pub fn with_provider_command(mut self, command: impl Into<String>) -> Self {
        self.provider_command = Some(command.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_comment_rounds(mut self, rounds: usize) -> Self {
        self.max_comment_rounds = Some(rounds);
        self
    }
}

/// Resolve configuration with the full precedence chain.
///
/// `env_provider` is the value of [`PROVIDER_COMMAND_ENV`], passed in so
/// callers (and tests) control the environment lookup.
pub fn resolve_config(
    file: &MurmurConfig,
    overrides: &ConfigOverrides,
    env_provider: Option<String>,
) -> Result<ResolvedConfig> {
    file.validate().map_err(Error::Config)?;

    let provider_command = if let Some(ref cmd) = overrides.provider_command {
        Some(Resolved::new(cmd.clone(), ValueSource::CliFlag))
    } else if let Some(cmd) = env_provider.filter(|c| !c.trim().is_empty()) {
        Some(Resolved::new(
            cmd,
            ValueSource::EnvVar(PROVIDER_COMMAND_ENV.to_string()),
        ))
    } else {
        file.provider_command
            .clone()
            .map(|cmd| Resolved::new(cmd, ValueSource::ConfigFile))
    };

    let seed = match (overrides.seed, file.seed) {
        (Some(s), _) => Some(Resolved::new(s, ValueSource::CliFlag)),
        (None, Some(s)) => Some(Resolved::new(s, ValueSource::ConfigFile)),
        (None, None) => None,
    };

    let resolved = ResolvedConfig {
        auto_post_enabled: pick(overrides.auto_post_enabled, file.auto_post_enabled, false),
        sweep_interval_secs: pick(None, file.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS),
        max_posts: pick(None, file.max_posts, DEFAULT_MAX_POSTS),
        max_comment_rounds: pick(
            overrides.max_comment_rounds,
            file.max_comment_rounds,
            DEFAULT_MAX_COMMENT_ROUNDS,
        ),
        temperature: pick(None, file.temperature, DEFAULT_TEMPERATURE),
        max_pending_compensation: pick(
            None,
            file.max_pending_compensation,
            DEFAULT_MAX_PENDING_COMPENSATION,
        ),
        provider_command,
        seed,
    };

    if resolved.max_comment_rounds.value == 0 {
        return Err(Error::Config("max-comment-rounds must be at least 1".to_string()));
    }
    Ok(resolved)
}
