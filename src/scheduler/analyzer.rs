//! Post-hoc relationship inference from settled comment threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Result;
use crate::engine::{RefreshHook, RefreshScope};
use crate::llm::{CompletionProvider, parse_json_reply};
use crate::models::{DirectionalPatch, PairKey, Post, is_self};
use crate::posts::PostStore;
use crate::profiles::ProfileSource;
use crate::relationships::RelationshipStore;
use crate::scheduler::prompts::{self, ThreadLine};

/// Replies between a pair needed before the pair is analyzed.
pub const MIN_EXCHANGES: usize = 2;

/// What the analysis concluded for one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisOutcome {
    pub agent_a: String,
    pub agent_b: String,
    pub exchanges: usize,
    pub summary: String,
    pub a_to_b: Option<String>,
    pub b_to_a: Option<String>,
    /// Whether at least one direction was written
    pub applied: bool,
}

#[derive(Debug, Deserialize)]
struct ShiftReply {
    #[serde(default)]
    summary: String,
    #[serde(default, alias = "aToB")]
    a_to_b: Option<String>,
    #[serde(default, alias = "bToA")]
    b_to_a: Option<String>,
}

pub struct RelationshipUpdateAnalyzer {
    profiles: Arc<dyn ProfileSource>,
    relationships: Arc<RelationshipStore>,
    posts: Arc<PostStore>,
    provider: Arc<dyn CompletionProvider>,
    refresh: Arc<dyn RefreshHook>,
    temperature: f32,
}

impl RelationshipUpdateAnalyzer {
    pub fn new(
        profiles: Arc<dyn ProfileSource>,
        relationships: Arc<RelationshipStore>,
        posts: Arc<PostStore>,
        provider: Arc<dyn CompletionProvider>,
        refresh: Arc<dyn RefreshHook>,
        temperature: f32,
    ) -> Self {
        Self {
            profiles,
            relationships,
            posts,
            provider,
            refresh,
            temperature,
        }
    }

    /// Agent pairs (operator excluded) that replied to each other at least
    /// [`MIN_EXCHANGES`] times, with their reply counts.
    pub fn reply_pairs(post: &Post) -> BTreeMap<PairKey, usize> {
        let mut counts = BTreeMap::new();
        for comment in &post.comments {
            let Some(ref to) = comment.reply_to_author_id else {
                continue;
            };
            if is_self(&comment.author_id) || is_self(to) || comment.author_id == *to {
                continue;
            }
            *counts.entry(PairKey::new(&comment.author_id, to)).or_insert(0) += 1;
        }
        counts.retain(|_, n| *n >= MIN_EXCHANGES);
        counts
    }

    /// Analyze every qualifying pair of a post's thread.
    ///
    /// Provider and parse failures skip the pair; they are never fatal.
    pub async fn analyze_post(&self, post_id: &str) -> Result<Vec<AnalysisOutcome>> {
        let Some(post) = self.posts.get_post(post_id)? else {
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        for (key, exchanges) in Self::reply_pairs(&post) {
            match self.analyze_pair(&post, &key, exchanges).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => warn!(post = post_id, pair = %key, error = %e, "relationship analysis failed"),
            }
        }
        if outcomes.iter().any(|o| o.applied) {
            self.refresh.refresh(RefreshScope::Relationships);
        }
        Ok(outcomes)
    }

    async fn analyze_pair(
        &self,
        post: &Post,
        key: &PairKey,
        exchanges: usize,
    ) -> Result<Option<AnalysisOutcome>> {
        let a_name = self.profiles.display_name(&key.first);
        let b_name = self.profiles.display_name(&key.second);
        let exchange: Vec<ThreadLine> = post
            .comments
            .iter()
            .filter(|c| key.contains(&c.author_id))
            .filter(|c| c.reply_to_author_id.as_deref().is_some_and(|to| key.contains(to)))
            .map(|c| ThreadLine {
                author: self.profiles.display_name(&c.author_id),
                reply_to: c.reply_to_author_id.as_deref().map(|id| self.profiles.display_name(id)),
                text: c.text.clone(),
            })
            .collect();

        let messages = prompts::analysis_messages(&a_name, &b_name, &post.text, &exchange);
        let reply = match self.provider.complete(&messages, self.temperature).await {
            Ok(text) => text,
            Err(e) => {
                warn!(pair = %key, error = %e, "analysis request failed");
                return Ok(None);
            }
        };
        let Some(shift) = parse_json_reply::<ShiftReply>(&reply) else {
            warn!(pair = %key, "analysis reply was not a JSON object");
            return Ok(None);
        };

        let a_to_b = shift.a_to_b.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let b_to_a = shift.b_to_a.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let mut applied = false;
        if let Some(ref text) = a_to_b {
            applied |= self.relationships.update_incremental(
                &key.first,
                &key.second,
                &DirectionalPatch::private_attitude(text.clone()),
            )?;
        }
        if let Some(ref text) = b_to_a {
            applied |= self.relationships.update_incremental(
                &key.second,
                &key.first,
                &DirectionalPatch::private_attitude(text.clone()),
            )?;
        }

        info!(pair = %key, exchanges, applied, "relationship analyzed");
        Ok(Some(AnalysisOutcome {
            agent_a: key.first.clone(),
            agent_b: key.second.clone(),
            exchanges,
            summary: shift.summary.trim().to_string(),
            a_to_b,
            b_to_a,
            applied,
        }))
    }
}
