//! Periodic autonomous posting.
//!
//! Every sweep walks the agents one by one with a short random pause in
//! between and runs the per-agent state machine in [`AutoPostScheduler::check_agent_at`].
//! Long outages never burst-post: missed slots become lazily consumed
//! compensation timestamps instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{debug, info, warn};

use crate::config::MIN_SWEEP_INTERVAL_SECS;
use crate::dice::Dice;
use crate::engine::{ActivityToggle, RefreshHook, RefreshScope};
use crate::llm::{CompletionProvider, DEFAULT_TEMPERATURE, parse_moment};
use crate::models::{AutoPostSettings, Frequency, Post, PostVisibility, is_self};
use crate::posts::{NewPost, PostStore};
use crate::profiles::ProfileSource;
use crate::relationships::RelationshipStore;
use crate::scheduler::comments::{MultiRoundCommentScheduler, ThreadReport};
use crate::scheduler::prompts::{self, MomentContext};
use crate::scheduler::{FOLLOW_UP_DELAY_SECS, SWEEP_AGENT_DELAY_SECS};
use crate::storage::{AUTO_POST_SETTINGS_KEY, JsonTable, KvBackend};
use crate::{Error, Result};

/// Chance that a long outage leaves one compensation slot behind.
pub const COMPENSATION_PROBABILITY: f64 = 0.7;

/// Own posts shown to the model so it does not repeat itself.
const RECENT_POSTS_FOR_DEDUPE: usize = 5;

#[derive(Debug, Clone)]
pub struct AutoPostOptions {
    pub sweep_interval: Duration,
    pub temperature: f32,
    /// Longest allowed compensation queue per agent
    pub max_pending_compensation: usize,
}

impl Default for AutoPostOptions {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(MIN_SWEEP_INTERVAL_SECS),
            temperature: DEFAULT_TEMPERATURE,
            max_pending_compensation: 3,
        }
    }
}

/// Result of one per-agent check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Frequency is "never"
    Never,
    /// First check: the timer was seeded somewhere in the last interval
    Seeded { last_auto_post_at: DateTime<Utc> },
    NotDue { due_at: DateTime<Utc> },
    Posted { post_id: String },
    /// The model call or its parsing failed; retried next sweep
    GenerationFailed,
    /// Long outage: maybe one slot queued, timer re-seeded, nothing generated
    Compensation { enqueued: bool, pending: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Completed,
    Disabled,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCheck {
    pub agent: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub status: SweepStatus,
    pub checks: Vec<AgentCheck>,
}

impl SweepReport {
    fn empty(status: SweepStatus) -> Self {
        Self {
            status,
            checks: Vec::new(),
        }
    }
}

/// Clears the sweep flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct AutoPostScheduler {
    settings: JsonTable<BTreeMap<String, AutoPostSettings>>,
    profiles: Arc<dyn ProfileSource>,
    relationships: Arc<RelationshipStore>,
    posts: Arc<PostStore>,
    provider: Arc<dyn CompletionProvider>,
    comments: Arc<MultiRoundCommentScheduler>,
    dice: Arc<Dice>,
    toggle: ActivityToggle,
    refresh: Arc<dyn RefreshHook>,
    sweeping: AtomicBool,
    /// Comment threads started by generated posts, by post id
    follow_ups: Mutex<HashMap<String, JoinHandle<Option<ThreadReport>>>>,
    options: AutoPostOptions,
}

impl AutoPostScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn KvBackend>,
        profiles: Arc<dyn ProfileSource>,
        relationships: Arc<RelationshipStore>,
        posts: Arc<PostStore>,
        provider: Arc<dyn CompletionProvider>,
        comments: Arc<MultiRoundCommentScheduler>,
        dice: Arc<Dice>,
        toggle: ActivityToggle,
        refresh: Arc<dyn RefreshHook>,
        options: AutoPostOptions,
    ) -> Self {
        Self {
            settings: JsonTable::new(backend, AUTO_POST_SETTINGS_KEY),
            profiles,
            relationships,
            posts,
            provider,
            comments,
            dice,
            toggle,
            refresh,
            sweeping: AtomicBool::new(false),
            follow_ups: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Settings for an agent, created with defaults on first access.
    pub fn settings(&self, agent: &str) -> Result<AutoPostSettings> {
        self.modify(agent, |s| s.clone())
    }

    /// Every agent's stored settings.
    pub fn all_settings(&self) -> Result<BTreeMap<String, AutoPostSettings>> {
        self.settings.load()
    }

    /// Change an agent's frequency and/or style hint.
    ///
    /// An empty style hint clears it.
    pub fn update_settings(
        &self,
        agent: &str,
        frequency: Option<Frequency>,
        style_hint: Option<String>,
    ) -> Result<AutoPostSettings> {
        if is_self(agent) || self.profiles.profile(agent)?.is_none() {
            return Err(Error::NotFound(format!("agent {}", agent)));
        }
        let updated = self.modify(agent, |s| {
            if let Some(f) = frequency {
                s.frequency = f;
            }
            if let Some(hint) = style_hint {
                let hint = hint.trim();
                s.style_hint = (!hint.is_empty()).then(|| hint.to_string());
            }
            s.clone()
        })?;
        self.refresh.refresh(RefreshScope::Settings);
        Ok(updated)
    }

    fn modify<R>(&self, agent: &str, f: impl FnOnce(&mut AutoPostSettings) -> R) -> Result<R> {
        self.settings
            .update(|all| Ok(f(all.entry(agent.to_string()).or_default())))
    }

    /// A uniformly random instant strictly between `start` and `end`.
    fn random_instant(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
        let span = (end - start).num_milliseconds();
        if span <= 2 {
            return start + (end - start) / 2;
        }
        start + chrono::Duration::milliseconds(self.dice.between(1, span - 1))
    }

    /// Sweep forever at the configured cadence.
    pub async fn run(&self) {
        let period = self
            .options
            .sweep_interval
            .max(Duration::from_secs(MIN_SWEEP_INTERVAL_SECS));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "auto-post loop started");
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(report) => debug!(status = ?report.status, checked = report.checks.len(), "sweep done"),
                Err(e) => warn!(error = %e, "sweep failed"),
            }
        }
    }

    /// Run one sweep over all agents, unless disabled or already running.
    pub async fn sweep(&self) -> Result<SweepReport> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sweep already running");
            return Ok(SweepReport::empty(SweepStatus::AlreadyRunning));
        }
        let _guard = SweepGuard(&self.sweeping);

        if !self.toggle.is_enabled() {
            return Ok(SweepReport::empty(SweepStatus::Disabled));
        }

        let mut report = SweepReport::empty(SweepStatus::Completed);
        for (i, agent) in self.profiles.agent_ids()?.into_iter().enumerate() {
            if i > 0 {
                let (lo, hi) = SWEEP_AGENT_DELAY_SECS;
                sleep(self.dice.delay_secs(lo, hi)).await;
            }
            match self.check_agent_at(&agent, Utc::now()).await {
                Ok(outcome) => report.checks.push(AgentCheck { agent, outcome }),
                Err(e) => warn!(agent, error = %e, "auto-post check failed"),
            }
        }
        Ok(report)
    }

    /// The per-agent state machine, evaluated at `now`.
    pub async fn check_agent_at(&self, agent: &str, now: DateTime<Utc>) -> Result<CheckOutcome> {
        let settings = self.settings(agent)?;
        let Some(interval) = settings.frequency.interval() else {
            return Ok(CheckOutcome::Never);
        };

        let window_start = now
            .checked_sub_signed(interval)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let Some(last) = settings.last_auto_post_at else {
            let seeded = self.random_instant(window_start, now);
            self.modify(agent, |s| s.last_auto_post_at = Some(seeded))?;
            info!(agent, seeded = %seeded, "auto-post timer seeded");
            return Ok(CheckOutcome::Seeded {
                last_auto_post_at: seeded,
            });
        };

        let due_at = match last.checked_add_signed(interval) {
            Some(due_at) if due_at <= now => due_at,
            other => {
                return Ok(CheckOutcome::NotDue {
                    due_at: other.unwrap_or(DateTime::<Utc>::MAX_UTC),
                });
            }
        };

        // Up to half an interval late still posts normally
        let grace_end = interval
            .checked_add(&(interval / 2))
            .and_then(|grace| last.checked_add_signed(grace));
        if grace_end.is_none_or(|end| now <= end) {
            return Ok(match self.generate(agent, None, now).await? {
                Some(post) => CheckOutcome::Posted { post_id: post.id },
                None => CheckOutcome::GenerationFailed,
            });
        }

        // Long outage: queue at most one slot from the missed window, re-seed,
        // and leave the model alone.
        let slot = self
            .dice
            .chance(COMPENSATION_PROBABILITY)
            .then(|| self.random_instant(due_at, now));
        let reseeded = self.random_instant(window_start, now);
        let max_pending = self.options.max_pending_compensation;
        let (enqueued, pending) = self.modify(agent, |s| {
            let enqueued = match slot {
                Some(at) if s.pending_compensation.len() < max_pending => {
                    s.pending_compensation.push_back(at);
                    true
                }
                _ => false,
            };
            s.last_auto_post_at = Some(reseeded);
            (enqueued, s.pending_compensation.len())
        })?;
        info!(agent, enqueued, pending, "auto-post outage compensated");
        Ok(CheckOutcome::Compensation { enqueued, pending })
    }

    /// Backfill one pending compensation post, oldest slot first.
    ///
    /// Called when something shows interest in the agent (e.g. the operator
    /// opens a conversation). A failed generation puts the slot back, and so
    /// does an error on the way.
    pub async fn consume_compensation(&self, agent: &str) -> Result<Option<Post>> {
        let Some(at) = self.modify(agent, |s| s.pending_compensation.pop_front())? else {
            return Ok(None);
        };
        match self.generate(agent, Some(at), Utc::now()).await {
            Ok(Some(post)) => Ok(Some(post)),
            outcome => {
                self.modify(agent, |s| s.pending_compensation.push_front(at))?;
                outcome
            }
        }
    }

    /// Wait for the comment thread a generated post started.
    ///
    /// `None` when this scheduler started no thread for the post, or the
    /// thread aborted.
    pub async fn follow_up(&self, post_id: &str) -> Result<Option<ThreadReport>> {
        let handle = self
            .follow_ups
            .lock()
            .map_err(|_| Error::Other("follow-up registry poisoned".to_string()))?
            .remove(post_id);
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Other(format!("comment thread for {} failed: {}", post_id, e))),
            None => Ok(None),
        }
    }

    async fn generate(
        &self,
        agent: &str,
        backdate: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<Post>> {
        let profile = self
            .profiles
            .profile(agent)?
            .ok_or_else(|| Error::NotFound(format!("agent {}", agent)))?;
        let settings = self.settings(agent)?;

        let mut relationships = Vec::new();
        for other in self.relationships.neighbors(agent)? {
            if let Some(rel) = self.relationships.get(agent, &other)? {
                let name = self.profiles.display_name(&other);
                relationships.push(prompts::relationship_line(&name, &rel));
            }
        }
        let recent_posts = self
            .posts
            .recent_posts_by(agent, RECENT_POSTS_FOR_DEDUPE)?
            .into_iter()
            .map(|p| p.text)
            .collect();

        let messages = prompts::moment_messages(&MomentContext {
            profile: &profile,
            relationships,
            recent_posts,
            style_hint: settings.style_hint.as_deref(),
            backdate,
        });

        let reply = match self.provider.complete(&messages, self.options.temperature).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent, provider = self.provider.name(), error = %e, "moment generation failed");
                return Ok(None);
            }
        };
        let Some(moment) = parse_moment(&reply) else {
            warn!(agent, chars = reply.chars().count(), "moment reply discarded");
            return Ok(None);
        };

        let post = self.posts.create_post(NewPost {
            author_id: agent.to_string(),
            text: moment.content,
            media: moment.images,
            visibility: PostVisibility::All,
            location: moment.location,
            ai_generated: true,
            created_at: backdate,
        })?;
        if backdate.is_none() {
            self.modify(agent, |s| s.last_auto_post_at = Some(now))?;
        }
        self.refresh.refresh(RefreshScope::Posts);

        let (lo, hi) = FOLLOW_UP_DELAY_SECS;
        let thread = self
            .comments
            .spawn_after(post.id.clone(), self.dice.delay_secs(lo, hi));
        if let Ok(mut follow_ups) = self.follow_ups.lock() {
            follow_ups.retain(|_, handle| !handle.is_finished());
            follow_ups.insert(post.id.clone(), thread);
        }
        info!(agent, post = %post.id, backdated = backdate.is_some(), "moment posted");
        Ok(Some(post))
    }
}
