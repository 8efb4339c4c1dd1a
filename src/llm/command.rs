//! Subprocess-backed provider.
//!
//! Runs a user-configured command through `sh -c`, writes the request as one
//! JSON document to its stdin, and takes trimmed stdout as the completion.
//! This keeps every model wire format out of the engine: point
//! `provider-command` at any script that talks to the model of your choice.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ChatMessage, CompletionProvider};
use crate::{Error, Result};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
}

pub struct CommandProvider {
    command: String,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl CompletionProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let request = serde_json::to_vec(&CompletionRequest {
            messages,
            temperature,
        })?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Provider(format!("failed to spawn '{}': {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).await?;
            // Dropping stdin closes the pipe so the command sees EOF.
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provider(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(bytes = text.len(), "provider command returned");
        if text.is_empty() {
            return Err(Error::Provider(format!("'{}' produced no output", self.command)));
        }
        Ok(text)
    }
}
