//! Reactions and bounded comment rounds on a fresh post.
//!
//! A fresh post first gets one independently delayed look from every agent
//! that can see it (like, maybe comment). Then the thread runs in rounds:
//! each round gives every agent one sequential turn, and the loop stops as
//! soon as a round produces no new comment or the round cap is reached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dice::Dice;
use crate::engine::{RefreshHook, RefreshScope};
use crate::llm::{CompletionProvider, DEFAULT_TEMPERATURE, strip_code_fences};
use crate::models::{Comment, Post};
use crate::posts::PostStore;
use crate::profiles::ProfileSource;
use crate::reaction::ReactionEngine;
use crate::relationships::RelationshipStore;
use crate::scheduler::analyzer::{AnalysisOutcome, RelationshipUpdateAnalyzer};
use crate::scheduler::prompts::{self, CommentContext, ThreadLine};
use crate::scheduler::{INITIAL_REACTION_DELAY_SECS, REPLY_DELAY_SECS};
use crate::{Error, Result};

pub const DEFAULT_MAX_ROUNDS: usize = 6;

/// Reply probability in the first two rounds.
pub const BASE_REPLY_PROBABILITY: f64 = 0.5;

/// Chance that an agent who decided to react also leaves a first comment.
pub const INITIAL_COMMENT_PROBABILITY: f64 = 0.5;

/// Generated comments longer than this are cut.
const MAX_COMMENT_CHARS: usize = 280;

/// Probability that an agent with a target actually replies in `round` (1-based).
pub fn reply_probability(round: usize) -> f64 {
    if round > 4 {
        BASE_REPLY_PROBABILITY * 0.2
    } else if round > 2 {
        BASE_REPLY_PROBABILITY * 0.4
    } else {
        BASE_REPLY_PROBABILITY
    }
}

#[derive(Debug, Clone)]
pub struct CommentOptions {
    /// Hard cap on rounds per thread
    pub max_rounds: usize,
    pub temperature: f32,
}

impl Default for CommentOptions {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// What happened on one thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadReport {
    pub post_id: String,
    pub audience: usize,
    pub initial_likes: usize,
    pub initial_comments: usize,
    /// Rounds that produced at least one comment
    pub rounds: usize,
    pub round_comments: usize,
    pub analysis: Vec<AnalysisOutcome>,
}

#[derive(Debug, Default)]
struct InitialReaction {
    liked: bool,
    commented: bool,
}

pub struct MultiRoundCommentScheduler {
    profiles: Arc<dyn ProfileSource>,
    relationships: Arc<RelationshipStore>,
    posts: Arc<PostStore>,
    reactions: Arc<ReactionEngine>,
    provider: Arc<dyn CompletionProvider>,
    analyzer: Arc<RelationshipUpdateAnalyzer>,
    refresh: Arc<dyn RefreshHook>,
    options: CommentOptions,
}

impl MultiRoundCommentScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profiles: Arc<dyn ProfileSource>,
        relationships: Arc<RelationshipStore>,
        posts: Arc<PostStore>,
        reactions: Arc<ReactionEngine>,
        provider: Arc<dyn CompletionProvider>,
        analyzer: Arc<RelationshipUpdateAnalyzer>,
        refresh: Arc<dyn RefreshHook>,
        options: CommentOptions,
    ) -> Self {
        Self {
            profiles,
            relationships,
            posts,
            reactions,
            provider,
            analyzer,
            refresh,
            options,
        }
    }

    fn dice(&self) -> &Dice {
        self.reactions.dice()
    }

    /// Run [`on_new_post`](Self::on_new_post) as a background task after `delay`.
    ///
    /// The task yields the thread report, or `None` when the thread aborted.
    pub fn spawn_after(
        self: &Arc<Self>,
        post_id: String,
        delay: Duration,
    ) -> JoinHandle<Option<ThreadReport>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            sleep(delay).await;
            match this.on_new_post(&post_id).await {
                Ok(report) => {
                    debug!(post = %post_id, rounds = report.rounds, "thread finished");
                    Some(report)
                }
                Err(e) => {
                    warn!(post = %post_id, error = %e, "thread aborted");
                    None
                }
            }
        })
    }

    /// Drive the full life of a fresh post's thread.
    pub async fn on_new_post(&self, post_id: &str) -> Result<ThreadReport> {
        let post = self
            .posts
            .get_post(post_id)?
            .ok_or_else(|| Error::NotFound(format!("post {}", post_id)))?;
        let audience = self.audience(&post)?;
        info!(post = post_id, author = %post.author_id, audience = audience.len(), "thread started");

        let mut report = ThreadReport {
            post_id: post_id.to_string(),
            audience: audience.len(),
            ..ThreadReport::default()
        };

        let reactions = join_all(audience.iter().map(|agent| self.initial_reaction(&post, agent))).await;
        for reaction in reactions {
            report.initial_likes += usize::from(reaction.liked);
            report.initial_comments += usize::from(reaction.commented);
        }
        if report.initial_likes + report.initial_comments > 0 {
            self.refresh.refresh(RefreshScope::Posts);
        }

        self.run_rounds(&post, &audience, &mut report).await?;
        report.analysis = self.analyzer.analyze_post(post_id).await?;
        info!(
            post = post_id,
            rounds = report.rounds,
            comments = report.initial_comments + report.round_comments,
            "thread settled"
        );
        Ok(report)
    }

    /// Agents other than the author that can see the post.
    fn audience(&self, post: &Post) -> Result<Vec<String>> {
        let mut audience = Vec::new();
        for agent in self.profiles.agent_ids()? {
            if agent != post.author_id && self.posts.is_visible_to(post, &agent)? {
                audience.push(agent);
            }
        }
        Ok(audience)
    }

    async fn initial_reaction(&self, post: &Post, agent: &str) -> InitialReaction {
        let (lo, hi) = INITIAL_REACTION_DELAY_SECS;
        sleep(self.dice().delay_secs(lo, hi)).await;
        match self.try_initial_reaction(post, agent).await {
            Ok(reaction) => reaction,
            Err(e) => {
                warn!(post = %post.id, agent, error = %e, "initial reaction failed");
                InitialReaction::default()
            }
        }
    }

    async fn try_initial_reaction(&self, post: &Post, agent: &str) -> Result<InitialReaction> {
        let mut reaction = InitialReaction::default();
        if !self.reactions.should_interact(agent, &post.author_id)? {
            return Ok(reaction);
        }
        let Some(current) = self.posts.get_post(&post.id)? else {
            return Ok(reaction);
        };
        if !current.likes.contains(agent) {
            reaction.liked = self.posts.toggle_like(&post.id, agent)?;
        }
        if self.dice().chance(INITIAL_COMMENT_PROBABILITY) {
            let thread = self.visible_thread(&current, agent)?;
            if let Some(text) = self.generate_comment(&current, agent, &thread, None).await? {
                self.posts.add_comment(&post.id, agent, &text, None)?;
                reaction.commented = true;
            }
        }
        debug!(post = %post.id, agent, liked = reaction.liked, commented = reaction.commented, "initial reaction");
        Ok(reaction)
    }

    async fn run_rounds(&self, post: &Post, audience: &[String], report: &mut ThreadReport) -> Result<()> {
        let mut caps: HashMap<&str, usize> = HashMap::new();
        for agent in audience {
            caps.insert(agent.as_str(), self.reactions.round_cap(agent, &post.author_id)?);
        }
        let mut participated: HashMap<&str, usize> = HashMap::new();

        for round in 1..=self.options.max_rounds {
            let mut new_comments = 0;
            for agent in audience {
                let taken = participated.get(agent.as_str()).copied().unwrap_or(0);
                if taken >= caps.get(agent.as_str()).copied().unwrap_or(1) {
                    continue;
                }
                // Re-read so every turn sees replies written earlier in the round.
                let Some(current) = self.posts.get_post(&post.id)? else {
                    debug!(post = %post.id, "post deleted mid-thread");
                    return Ok(());
                };
                match self.take_turn(&current, agent, round).await {
                    Ok(true) => {
                        new_comments += 1;
                        *participated.entry(agent.as_str()).or_insert(0) += 1;
                        let (lo, hi) = REPLY_DELAY_SECS;
                        sleep(self.dice().delay_secs(lo, hi)).await;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(post = %post.id, agent, round, error = %e, "comment turn failed"),
                }
            }

            debug!(post = %post.id, round, new_comments, "round finished");
            if new_comments == 0 {
                break;
            }
            report.rounds += 1;
            report.round_comments += new_comments;
            self.refresh.refresh(RefreshScope::Posts);
        }
        Ok(())
    }

    /// One agent's turn in a round. Returns whether it commented.
    async fn take_turn(&self, post: &Post, agent: &str, round: usize) -> Result<bool> {
        let thread = self.visible_thread(post, agent)?;
        if thread.last().is_some_and(|c| c.author_id == agent) {
            return Ok(false);
        }
        let Some(target) = self.select_target(post, &thread, agent)? else {
            return Ok(false);
        };
        if !self.dice().chance(reply_probability(round)) {
            return Ok(false);
        }
        let Some(text) = self.generate_comment(post, agent, &thread, Some(target)).await? else {
            return Ok(false);
        };
        self.posts.add_comment(&post.id, agent, &text, Some(&target.id))?;
        debug!(post = %post.id, agent, round, target = %target.id, "reply written");
        Ok(true)
    }

    /// Comments `agent` can see: its own, plus those by authors it shares
    /// any relationship edge with.
    pub fn visible_thread<'p>(&self, post: &'p Post, agent: &str) -> Result<Vec<&'p Comment>> {
        let mut visible = Vec::new();
        for comment in &post.comments {
            if comment.author_id == agent || self.relationships.has_edge(agent, &comment.author_id)? {
                visible.push(comment);
            }
        }
        Ok(visible)
    }

    /// Pick the comment `agent` should answer, if any.
    ///
    /// An unanswered comment addressed to the agent since its last comment
    /// wins. Otherwise an agent that has never commented may interject on a
    /// random comment from someone else.
    fn select_target<'p>(
        &self,
        post: &Post,
        thread: &[&'p Comment],
        agent: &str,
    ) -> Result<Option<&'p Comment>> {
        let name = self.profiles.display_name(agent);
        let since = thread
            .iter()
            .rposition(|c| c.author_id == agent)
            .map_or(0, |i| i + 1);
        let addressed = thread[since..].iter().rev().find(|c| {
            c.author_id != agent
                && (c.reply_to_author_id.as_deref() == Some(agent) || mentions(&c.text, &name))
        });
        if let Some(comment) = addressed {
            return Ok(Some(*comment));
        }

        if post.comments.iter().any(|c| c.author_id == agent) {
            return Ok(None);
        }
        let others: Vec<&'p Comment> = thread
            .iter()
            .copied()
            .filter(|c| c.author_id != agent)
            .collect();
        let Some(idx) = self.dice().index(others.len()) else {
            return Ok(None);
        };
        let candidate = others[idx];
        if self.reactions.should_interact(agent, &candidate.author_id)? {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }

    async fn generate_comment(
        &self,
        post: &Post,
        agent: &str,
        thread: &[&Comment],
        target: Option<&Comment>,
    ) -> Result<Option<String>> {
        let Some(profile) = self.profiles.profile(agent)? else {
            return Ok(None);
        };
        let author_name = self.profiles.display_name(&post.author_id);
        let relation_to_author = self
            .relationships
            .get(agent, &post.author_id)?
            .map(|rel| prompts::relationship_line(&author_name, &rel));

        let ctx = CommentContext {
            profile: &profile,
            post_author: &author_name,
            post_text: &post.text,
            relation_to_author,
            thread: thread.iter().map(|c| self.thread_line(c)).collect(),
            target: target.map(|c| self.thread_line(c)),
        };
        let messages = prompts::comment_messages(&ctx);
        match self.provider.complete(&messages, self.options.temperature).await {
            Ok(reply) => Ok(clean_comment(&reply, &profile.display_name)),
            Err(e) => {
                warn!(post = %post.id, agent, error = %e, "comment generation failed");
                Ok(None)
            }
        }
    }

    fn thread_line(&self, comment: &Comment) -> ThreadLine {
        ThreadLine {
            author: self.profiles.display_name(&comment.author_id),
            reply_to: comment
                .reply_to_author_id
                .as_deref()
                .map(|id| self.profiles.display_name(id)),
            text: comment.text.clone(),
        }
    }
}

fn mentions(text: &str, name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && text.to_lowercase().contains(&name.to_lowercase())
}

/// Normalize a generated comment: no fences, quotes, or "Name:" prefix.
fn clean_comment(reply: &str, own_name: &str) -> Option<String> {
    let mut text = strip_code_fences(reply).trim();
    if let Some(rest) = text.strip_prefix(own_name).and_then(|r| r.strip_prefix(':')) {
        text = rest.trim();
    }
    let text = text
        .trim_matches(|c| c == '"' || c == '\u{201c}' || c == '\u{201d}')
        .trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_COMMENT_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoopRefresh;
    use crate::models::{PostVisibility, Relationship, SELF_ID};
    use crate::posts::NewPost;
    use crate::test_utils::{ScriptedProvider, TestEnv};
    use serde_json::json;

    fn scheduler(
        env: &TestEnv,
        provider: Arc<ScriptedProvider>,
        max_rounds: usize,
    ) -> MultiRoundCommentScheduler {
        let reactions = Arc::new(env.reaction_engine());
        let analyzer = Arc::new(RelationshipUpdateAnalyzer::new(
            env.profiles.clone(),
            env.relationships.clone(),
            env.posts.clone(),
            provider.clone(),
            Arc::new(NoopRefresh),
            0.5,
        ));
        MultiRoundCommentScheduler::new(
            env.profiles.clone(),
            env.relationships.clone(),
            env.posts.clone(),
            reactions,
            provider,
            analyzer,
            Arc::new(NoopRefresh),
            CommentOptions {
                max_rounds,
                temperature: 0.5,
            },
        )
    }

    fn add_lover(env: &TestEnv, id: &str, name: &str) {
        env.profiles
            .put_raw(
                id,
                json!({ "id": id, "name": name, "persona": "bubbly gossip", "relationship": "girlfriend" }),
            )
            .unwrap();
    }

    fn link(env: &TestEnv, a: &str, b: &str, label: &str) {
        let mut rel = Relationship::new(a, b);
        rel.a_to_b.public_label = Some(label.to_string());
        rel.b_to_a.public_label = Some(label.to_string());
        env.relationships.save(rel).unwrap();
    }

    #[test]
    fn test_reply_probability_decays() {
        assert_eq!(reply_probability(1), 0.5);
        assert_eq!(reply_probability(2), 0.5);
        assert!((reply_probability(3) - 0.2).abs() < 1e-12);
        assert!((reply_probability(4) - 0.2).abs() < 1e-12);
        assert!((reply_probability(5) - 0.1).abs() < 1e-12);
        assert!((reply_probability(6) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_clean_comment() {
        assert_eq!(clean_comment("\"So true!\"", "Ana").as_deref(), Some("So true!"));
        assert_eq!(clean_comment("Ana: lol", "Ana").as_deref(), Some("lol"));
        assert_eq!(clean_comment("```\nhey\n```", "Ana").as_deref(), Some("hey"));
        assert!(clean_comment("  \"\" ", "Ana").is_none());
        assert_eq!(clean_comment(&"z".repeat(400), "Ana").unwrap().len(), MAX_COMMENT_CHARS);
    }

    #[test]
    fn test_mentions_is_case_insensitive() {
        assert!(mentions("what do you think, ana?", "Ana"));
        assert!(!mentions("nobody here", "Ana"));
        assert!(!mentions("anything", " "));
    }

    #[test]
    fn test_visible_thread_requires_an_edge() {
        let env = TestEnv::new();
        env.add_agent("a", "Ana", "");
        env.add_agent("b", "Ben", "");
        env.add_agent("c", "Cal", "");
        link(&env, "a", "b", "coworker");
        let post = env.posts.create_post(NewPost::new(SELF_ID, "hello")).unwrap();
        env.posts.add_comment(&post.id, "b", "from ben", None).unwrap();
        env.posts.add_comment(&post.id, "c", "from cal", None).unwrap();
        env.posts.add_comment(&post.id, "a", "from ana", None).unwrap();
        let post = env.posts.get_post(&post.id).unwrap().unwrap();

        let sched = scheduler(&env, Arc::new(ScriptedProvider::failing()), 6);
        let thread = sched.visible_thread(&post, "a").unwrap();
        let authors: Vec<&str> = thread.iter().map(|c| c.author_id.as_str()).collect();
        assert_eq!(authors, vec!["b", "a"]);
    }

    #[test]
    fn test_addressed_comment_is_preferred_target() {
        let env = TestEnv::new();
        env.add_agent("a", "Ana", "");
        env.add_agent("b", "Ben", "");
        link(&env, "a", "b", "coworker");
        let post = env.posts.create_post(NewPost::new(SELF_ID, "hello")).unwrap();
        let own = env.posts.add_comment(&post.id, "a", "first!", None).unwrap();
        env.posts.add_comment(&post.id, "b", "unrelated", None).unwrap();
        let reply = env.posts.add_comment(&post.id, "b", "calm down", Some(&own.id)).unwrap();
        let post = env.posts.get_post(&post.id).unwrap().unwrap();

        let sched = scheduler(&env, Arc::new(ScriptedProvider::failing()), 6);
        let thread = sched.visible_thread(&post, "a").unwrap();
        let target = sched.select_target(&post, &thread, "a").unwrap().unwrap();
        assert_eq!(target.id, reply.id);

        // Name mentions count as addressing too.
        env.posts.add_comment(&post.id, "a", "no u", Some(&reply.id)).unwrap();
        let mention = env.posts.add_comment(&post.id, "b", "ana, seriously", None).unwrap();
        let post = env.posts.get_post(&post.id).unwrap().unwrap();
        let thread = sched.visible_thread(&post, "a").unwrap();
        let target = sched.select_target(&post, &thread, "a").unwrap().unwrap();
        assert_eq!(target.id, mention.id);
    }

    #[test]
    fn test_commented_agent_without_address_has_no_target() {
        let env = TestEnv::new();
        env.add_agent("a", "Ana", "");
        env.add_agent("b", "Ben", "");
        link(&env, "a", "b", "coworker");
        let post = env.posts.create_post(NewPost::new(SELF_ID, "hello")).unwrap();
        env.posts.add_comment(&post.id, "a", "nice", None).unwrap();
        env.posts.add_comment(&post.id, "b", "agreed", None).unwrap();
        let post = env.posts.get_post(&post.id).unwrap().unwrap();

        let sched = scheduler(&env, Arc::new(ScriptedProvider::failing()), 6);
        let thread = sched.visible_thread(&post, "a").unwrap();
        assert!(sched.select_target(&post, &thread, "a").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_commenter_skips_turn() {
        let env = TestEnv::new();
        add_lover(&env, "a", "Ana");
        let post = env.posts.create_post(NewPost::new(SELF_ID, "hello")).unwrap();
        let mine = env.posts.add_comment(&post.id, SELF_ID, "ana?", None).unwrap();
        env.posts.add_comment(&post.id, "a", "yes?", Some(&mine.id)).unwrap();
        let post = env.posts.get_post(&post.id).unwrap().unwrap();

        let provider = Arc::new(ScriptedProvider::always("again"));
        let sched = scheduler(&env, provider.clone(), 6);
        for round in 1..=6 {
            assert!(!sched.take_turn(&post, "a", round).await.unwrap());
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_post_draws_no_reactions() {
        let env = TestEnv::new();
        add_lover(&env, "a", "Ana");
        add_lover(&env, "b", "Ben");
        let mut new = NewPost::new(SELF_ID, "diary");
        new.visibility = PostVisibility::Private;
        let post = env.posts.create_post(new).unwrap();

        let provider = Arc::new(ScriptedProvider::always("aww"));
        let report = scheduler(&env, provider.clone(), 6).on_new_post(&post.id).await.unwrap();
        assert_eq!(report.audience, 0);
        assert_eq!(report.initial_likes, 0);
        assert_eq!(provider.calls(), 0);
        assert!(env.posts.get_post(&post.id).unwrap().unwrap().comments.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_loop_is_hard_bounded() {
        let env = TestEnv::new();
        add_lover(&env, "a", "Ana");
        add_lover(&env, "b", "Ben");
        add_lover(&env, "c", "Cal");
        link(&env, "a", "b", "best friend");
        link(&env, "b", "c", "best friend");
        link(&env, "a", "c", "best friend");
        let post = env.posts.create_post(NewPost::new(SELF_ID, "guess where I am")).unwrap();
        env.posts.add_comment(&post.id, SELF_ID, "Ana Ben Cal, come!", None).unwrap();

        // Every reply addresses everyone, so every agent always has a target.
        let provider = Arc::new(ScriptedProvider::always("Ana Ben Cal what do you think"));
        let max_rounds = 3;
        let report = scheduler(&env, provider.clone(), max_rounds)
            .on_new_post(&post.id)
            .await
            .unwrap();

        assert_eq!(report.audience, 3);
        assert!(report.rounds <= max_rounds);
        assert!(report.round_comments <= max_rounds * 3);
        let post = env.posts.get_post(&post.id).unwrap().unwrap();
        assert!(post.comments.len() <= 1 + 3 + max_rounds * 3);
        // initial comments + round replies + one analysis per pair
        assert!(provider.calls() <= 3 + max_rounds * 3 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_agent_stays_within_two_rounds() {
        for i in 0..5 {
            let env = TestEnv::new();
            add_lover(&env, "a", "Ana");
            env.profiles
                .put_raw(
                    "b",
                    json!({
                        "id": "b",
                        "name": "Bram",
                        "persona": "reserved, high-status",
                        "relationship": "lover"
                    }),
                )
                .unwrap();
            link(&env, "a", "b", "close friend");
            let post = env
                .posts
                .create_post(NewPost::new(SELF_ID, &format!("post {}", i)))
                .unwrap();
            env.posts.add_comment(&post.id, SELF_ID, "Bram? Ana?", None).unwrap();

            let provider = Arc::new(ScriptedProvider::always("Bram and Ana, honestly"));
            scheduler(&env, provider, 6).on_new_post(&post.id).await.unwrap();

            let post = env.posts.get_post(&post.id).unwrap().unwrap();
            let replies_by_b = post
                .comments
                .iter()
                .filter(|c| c.author_id == "b" && c.reply_to_comment_id.is_some())
                .count();
            assert!(replies_by_b <= 2, "reserved agent replied {} times", replies_by_b);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_thread_runs_after_delay() {
        let env = TestEnv::new();
        add_lover(&env, "a", "Ana");
        let post = env.posts.create_post(NewPost::new(SELF_ID, "hi")).unwrap();
        let provider = Arc::new(ScriptedProvider::always("hi!"));
        let sched = Arc::new(scheduler(&env, provider, 2));

        let started = tokio::time::Instant::now();
        let report = sched
            .spawn_after(post.id.clone(), Duration::from_secs(3))
            .await
            .unwrap()
            .expect("thread report");
        // 3s follow-up delay plus at least the 5s minimum reaction delay.
        assert!(started.elapsed() >= Duration::from_secs(8));
        assert_eq!(report.post_id, post.id);
        assert_eq!(report.audience, 1);
    }
}
