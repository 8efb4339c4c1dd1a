//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The Rust struct representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation
//! - Default values

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Minimum cadence of the auto-post sweep loop.
pub const MIN_SWEEP_INTERVAL_SECS: u64 = 180;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = MIN_SWEEP_INTERVAL_SECS;
pub const DEFAULT_MAX_POSTS: usize = crate::posts::DEFAULT_MAX_POSTS;
pub const DEFAULT_MAX_COMMENT_ROUNDS: usize = 6;
pub const DEFAULT_TEMPERATURE: f64 = 0.9;
pub const DEFAULT_MAX_PENDING_COMPENSATION: usize = 3;

/// Engine tuning stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// auto-post-enabled #true
/// sweep-interval-secs 300
/// max-posts 200
/// max-comment-rounds 6
/// temperature 0.9
/// max-pending-compensation 3
/// provider-command "python3 ~/bin/complete.py"
/// seed 42
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MurmurConfig {
    /// Global toggle for autonomous posting
    pub auto_post_enabled: Option<bool>,

    /// Seconds between auto-post sweeps (at least 180)
    pub sweep_interval_secs: Option<u64>,

    /// How many posts the feed retains
    pub max_posts: Option<usize>,

    /// Hard cap on comment rounds per thread
    pub max_comment_rounds: Option<usize>,

    /// Sampling temperature passed to the language model
    pub temperature: Option<f64>,

    /// Longest allowed queue of pending compensation posts per agent
    pub max_pending_compensation: Option<usize>,

    /// Shell command used as the language-model provider
    pub provider_command: Option<String>,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl MurmurConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(secs) = self.sweep_interval_secs {
            if secs < MIN_SWEEP_INTERVAL_SECS {
                return Err(format!(
                    "sweep-interval-secs must be at least {}, got {}",
                    MIN_SWEEP_INTERVAL_SECS, secs
                ));
            }
        }
        if self.max_posts == Some(0) {
            return Err("max-posts must be at least 1".to_string());
        }
        if let Some(rounds) = self.max_comment_rounds {
            if !(1..=20).contains(&rounds) {
                return Err(format!("max-comment-rounds must be 1-20, got {}", rounds));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("temperature must be 0.0-2.0, got {}", t));
            }
        }
        if let Some(ref cmd) = self.provider_command {
            if cmd.trim().is_empty() {
                return Err("provider-command must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown nodes and values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            auto_post_enabled: first_value(doc, "auto-post-enabled").and_then(KdlValue::as_bool),
            sweep_interval_secs: first_unsigned(doc, "sweep-interval-secs"),
            max_posts: first_unsigned(doc, "max-posts").map(|v| v as usize),
            max_comment_rounds: first_unsigned(doc, "max-comment-rounds").map(|v| v as usize),
            temperature: first_value(doc, "temperature").and_then(|v| {
                v.as_float().or_else(|| v.as_integer().map(|i| i as f64))
            }),
            max_pending_compensation: first_unsigned(doc, "max-pending-compensation")
                .map(|v| v as usize),
            provider_command: first_value(doc, "provider-command")
                .and_then(KdlValue::as_string)
                .map(str::to_string),
            seed: first_unsigned(doc, "seed"),
        }
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(enabled) = self.auto_post_enabled {
            push_node(&mut doc, "auto-post-enabled", KdlValue::Bool(enabled));
        }
        if let Some(secs) = self.sweep_interval_secs {
            push_node(&mut doc, "sweep-interval-secs", KdlValue::Integer(secs as i128));
        }
        if let Some(max) = self.max_posts {
            push_node(&mut doc, "max-posts", KdlValue::Integer(max as i128));
        }
        if let Some(rounds) = self.max_comment_rounds {
            push_node(&mut doc, "max-comment-rounds", KdlValue::Integer(rounds as i128));
        }
        if let Some(t) = self.temperature {
            push_node(&mut doc, "temperature", KdlValue::Float(t));
        }
        if let Some(max) = self.max_pending_compensation {
            push_node(&mut doc, "max-pending-compensation", KdlValue::Integer(max as i128));
        }
        if let Some(ref cmd) = self.provider_command {
            push_node(&mut doc, "provider-command", KdlValue::String(cmd.clone()));
        }
        if let Some(seed) = self.seed {
            push_node(&mut doc, "seed", KdlValue::Integer(seed as i128));
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &MurmurConfig) {
        if other.auto_post_enabled.is_some() {
            self.auto_post_enabled = other.auto_post_enabled;
        }
        if other.sweep_interval_secs.is_some() {
            self.sweep_interval_secs = other.sweep_interval_secs;
        }
        if other.max_posts.is_some() {
            self.max_posts = other.max_posts;
        }
        if other.max_comment_rounds.is_some() {
            self.max_comment_rounds = other.max_comment_rounds;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.max_pending_compensation.is_some() {
            self.max_pending_compensation = other.max_pending_compensation;
        }
        if other.provider_command.is_some() {
            self.provider_command = other.provider_command.clone();
        }
        if other.seed.is_some() {
            self.seed = other.seed;
        }
    }

    /// Set one value by its config.kdl node name. An empty value unsets it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        let unset = value.is_empty();
        match key {
            "auto-post-enabled" => {
                self.auto_post_enabled = if unset { None } else { Some(parse_bool(value)?) }
            }
            "sweep-interval-secs" => self.sweep_interval_secs = parse_opt(value, key)?,
            "max-posts" => self.max_posts = parse_opt(value, key)?,
            "max-comment-rounds" => self.max_comment_rounds = parse_opt(value, key)?,
            "temperature" => self.temperature = parse_opt(value, key)?,
            "max-pending-compensation" => self.max_pending_compensation = parse_opt(value, key)?,
            "provider-command" => self.provider_command = (!unset).then(|| value.to_string()),
            "seed" => self.seed = parse_opt(value, key)?,
            _ => {
                return Err(format!(
                    "unknown config key '{}' (expected one of: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        self.validate()
    }
}

/// Node names understood in config.kdl.
pub const CONFIG_KEYS: &[&str] = &[
    "auto-post-enabled",
    "sweep-interval-secs",
    "max-posts",
    "max-comment-rounds",
    "temperature",
    "max-pending-compensation",
    "provider-command",
    "seed",
];

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("expected a boolean, got '{}'", value)),
    }
}

fn parse_opt<T: std::str::FromStr>(value: &str, key: &str) -> Result<Option<T>, String> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| format!("invalid value for {}: '{}'", key, value))
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn first_unsigned(doc: &KdlDocument, name: &str) -> Option<u64> {
    first_value(doc, name)
        .and_then(KdlValue::as_integer)
        .and_then(|i| u64::try_from(i).ok())
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}
