//! Murmur - an autonomous social-agent engine.
//!
//! This library provides the core of the `mur` CLI: a relationship graph with
//! perspective-dependent views, a per-observer rumor overlay, a feed of posts
//! and comments, and the schedulers that let simulated characters post, react,
//! and argue with each other on their own.

pub mod cli;
pub mod commands;
pub mod config;
pub mod dice;
pub mod engine;
pub mod llm;
pub mod models;
pub mod posts;
pub mod profiles;
pub mod reaction;
pub mod relationships;
pub mod scheduler;
pub mod storage;


/// Library-level error type for Murmur operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Language model error: {0}")]
    Provider(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Murmur operations.
pub type Result<T> = std::result::Result<T, Error>;
