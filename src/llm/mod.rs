//! Language-model completion collaborator.
//!
//! The engine only needs "role-tagged messages + temperature in, free text
//! out". Everything model-specific lives behind [`CompletionProvider`].

pub mod command;
pub mod parse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use command::CommandProvider;
pub use parse::{Moment, extract_json_object, parse_json_reply, parse_moment, strip_code_fences};

/// Default sampling temperature for generated content.
pub const DEFAULT_TEMPERATURE: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Anything that can turn a conversation into a completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Human-readable provider name for logs.
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Provider used when nothing is configured: every call fails.
///
/// Schedulers treat the failure as "no action this cycle", so an engine
/// without a provider still seeds timers and records compensation slots.
pub struct UnconfiguredProvider;

#[async_trait]
impl CompletionProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        Err(crate::Error::Provider(
            "no provider-command configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = ChatMessage::system("be brief");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "system");
        assert_eq!(value["content"], "be brief");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails() {
        let err = UnconfiguredProvider
            .complete(&[ChatMessage::user("hi")], 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Provider(_)));
    }
}
