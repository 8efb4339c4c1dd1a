//! Common test utilities for murmur integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/murmur/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
pub use tempfile::TempDir;

/// Provider command that ignores the request and answers with a fixed moment.
pub const MOMENT_PROVIDER: &str =
    "cat >/dev/null; echo '{\"content\":\"Caught the last ferry home\",\"location\":\"Harbor\"}'";

/// A test environment with isolated data storage.
///
/// The `mur()` method returns a `Command` that sets `MURMUR_DATA_DIR`
/// per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Create an environment with agents `a` (Ann) and `b` (Bo) imported.
    pub fn with_agents() -> Self {
        let env = Self::new();
        env.import(
            r#"[
                {"id": "a", "name": "Ann", "persona": "cheerful and outgoing", "relationship": "best friend"},
                {"id": "b", "displayName": "Bo", "persona": "quiet"}
            ]"#,
        );
        env
    }

    /// Get a Command for the mur binary with an isolated data directory.
    pub fn mur(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_mur"));
        cmd.env("MURMUR_DATA_DIR", self.data_dir.path());
        cmd.env("MURMUR_LOG", "warn");
        cmd.env_remove("MURMUR_PROVIDER_COMMAND");
        cmd
    }

    /// Run `mur` with `args`, assert success and parse stdout as JSON.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.mur().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap_or_else(|e| {
            panic!(
                "stdout of {:?} is not JSON ({}): {}",
                args,
                e,
                String::from_utf8_lossy(&output)
            )
        })
    }

    /// Import profiles from a JSON document.
    pub fn import(&self, profiles: &str) -> Value {
        let path = self.data_dir.path().join("profiles-import.json");
        std::fs::write(&path, profiles).unwrap();
        self.json(&["profile", "import", path.to_str().unwrap()])
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
