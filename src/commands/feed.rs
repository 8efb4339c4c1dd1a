//! Feed commands: posts, auto-posting, catch-up, and the run loop.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::{Context, Output, Removed, config_set, json};
use crate::models::{AutoPostSettings, Comment, Frequency, Post, PostVisibility, is_self};
use crate::posts::NewPost;
use crate::profiles::ProfileSource;
use crate::scheduler::{AgentCheck, CheckOutcome, SweepReport, SweepStatus, ThreadReport};
use crate::{Error, Result};

fn describe_post(post: &Post) -> String {
    let mut out = format!(
        "[{}] {} at {}{}",
        post.id,
        post.author_id,
        post.created_at.format("%Y-%m-%d %H:%M"),
        if post.ai_generated { " (auto)" } else { "" }
    );
    if let Some(ref location) = post.location {
        out.push_str(&format!(" @ {}", location));
    }
    if post.visibility != PostVisibility::All {
        out.push_str(&format!(" [{}]", post.visibility));
    }
    out.push_str(&format!("\n  {}", post.text));
    for image in &post.media {
        out.push_str(&format!("\n  [image: {}]", image));
    }
    if !post.likes.is_empty() {
        let likes: Vec<&str> = post.likes.iter().map(String::as_str).collect();
        out.push_str(&format!("\n  Liked by {}", likes.join(", ")));
    }
    for c in &post.comments {
        match c.reply_to_author_id {
            Some(ref to) => out.push_str(&format!("\n    {} -> {}: {} ({})", c.author_id, to, c.text, c.id)),
            None => out.push_str(&format!("\n    {}: {} ({})", c.author_id, c.text, c.id)),
        }
    }
    out
}

fn describe_thread(report: &ThreadReport) -> String {
    format!(
        "Thread {}: {} reader(s), {} like(s), {} first comment(s), {} round(s) with {} repl(ies), {} pair(s) analyzed",
        report.post_id,
        report.audience,
        report.initial_likes,
        report.initial_comments,
        report.rounds,
        report.round_comments,
        report.analysis.len()
    )
}

// === Posts ===

impl Output for Post {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        describe_post(self)
    }
}

/// Everything `post create` collects from the command line.
#[derive(Debug, Clone)]
pub struct PostDraft {
    pub author: String,
    pub text: String,
    pub media: Vec<String>,
    pub visibility: String,
    pub allow: Vec<String>,
    pub location: Option<String>,
}

#[derive(Serialize)]
pub struct PostCreated {
    pub post: Post,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadReport>,
}

impl Output for PostCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("Posted {}", describe_post(&self.post));
        if let Some(ref thread) = self.thread {
            out.push('\n');
            out.push_str(&describe_thread(thread));
        }
        out
    }
}

/// Publish a post; with `react`, wait for the thread it triggers to settle.
pub async fn post_create(ctx: &Context, draft: PostDraft, react: bool) -> Result<PostCreated> {
    ctx.require_node(&draft.author)?;
    let visibility = PostVisibility::parse(&draft.visibility, &draft.allow)
        .ok_or_else(|| Error::InvalidInput(format!("unknown visibility '{}'", draft.visibility)))?;
    let post = ctx.engine.posts.create_post(NewPost {
        author_id: draft.author,
        text: draft.text,
        media: draft.media,
        visibility,
        location: draft.location.filter(|l| !l.trim().is_empty()),
        ai_generated: false,
        created_at: None,
    })?;
    let thread = if react {
        Some(ctx.engine.comments.on_new_post(&post.id).await?)
    } else {
        None
    };
    Ok(PostCreated { post, thread })
}

#[derive(Serialize)]
pub struct PostList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
    pub count: usize,
    pub posts: Vec<Post>,
}

impl Output for PostList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.posts.is_empty() {
            return "No posts.".to_string();
        }
        self.posts
            .iter()
            .map(describe_post)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub fn post_list(ctx: &Context, viewer: Option<&str>) -> Result<PostList> {
    let posts = match viewer {
        Some(v) => ctx.engine.posts.visible_posts(v)?,
        None => ctx.engine.posts.list_posts()?,
    };
    Ok(PostList {
        viewer: viewer.map(str::to_string),
        count: posts.len(),
        posts,
    })
}

pub fn post_show(ctx: &Context, id: &str) -> Result<Post> {
    ctx.engine
        .posts
        .get_post(id)?
        .ok_or_else(|| Error::NotFound(format!("post {}", id)))
}

#[derive(Serialize)]
pub struct LikeResult {
    pub post_id: String,
    pub by: String,
    pub liked: bool,
}

impl Output for LikeResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.liked {
            format!("{} liked {}", self.by, self.post_id)
        } else {
            format!("{} unliked {}", self.by, self.post_id)
        }
    }
}

pub fn post_like(ctx: &Context, id: &str, by: &str) -> Result<LikeResult> {
    ctx.require_node(by)?;
    Ok(LikeResult {
        post_id: id.to_string(),
        by: by.to_string(),
        liked: ctx.engine.posts.toggle_like(id, by)?,
    })
}

impl Output for Comment {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.reply_to_author_id {
            Some(ref to) => format!("Comment {} by {} (reply to {}): {}", self.id, self.author_id, to, self.text),
            None => format!("Comment {} by {}: {}", self.id, self.author_id, self.text),
        }
    }
}

pub fn post_comment(
    ctx: &Context,
    id: &str,
    by: &str,
    text: &str,
    reply_to: Option<&str>,
) -> Result<Comment> {
    ctx.require_node(by)?;
    ctx.engine.posts.add_comment(id, by, text, reply_to)
}

pub fn post_uncomment(ctx: &Context, id: &str, comment: &str) -> Result<Removed> {
    Ok(Removed {
        kind: "comment",
        id: comment.to_string(),
        removed: ctx.engine.posts.delete_comment(id, comment)?,
    })
}

pub fn post_delete(ctx: &Context, id: &str) -> Result<Removed> {
    Ok(Removed {
        kind: "post",
        id: id.to_string(),
        removed: ctx.engine.posts.delete_post(id)?,
    })
}

#[derive(Serialize)]
pub struct Compressed {
    pub keep: usize,
    pub dropped: usize,
}

impl Output for Compressed {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Dropped {} post(s), keeping at most {}", self.dropped, self.keep)
    }
}

pub fn post_compress(ctx: &Context, keep: Option<usize>) -> Result<Compressed> {
    let keep = keep.unwrap_or(ctx.config.max_posts.value);
    Ok(Compressed {
        keep,
        dropped: ctx.engine.posts.compress_old_posts(keep)?,
    })
}

// === Auto-post ===

#[derive(Serialize)]
pub struct AgentSettings {
    pub agent: String,
    #[serde(flatten)]
    pub settings: AutoPostSettings,
}

fn describe_settings(entry: &AgentSettings) -> String {
    let s = &entry.settings;
    let mut out = format!("{}: every {}", entry.agent, s.frequency);
    if let Some(ref hint) = s.style_hint {
        out.push_str(&format!(", style \"{}\"", hint));
    }
    if let Some(last) = s.last_auto_post_at {
        out.push_str(&format!(", last {}", last.format("%Y-%m-%d %H:%M")));
    }
    if !s.pending_compensation.is_empty() {
        out.push_str(&format!(", {} missed post(s) pending", s.pending_compensation.len()));
    }
    out
}

impl Output for AgentSettings {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        describe_settings(self)
    }
}

pub fn autopost_set(
    ctx: &Context,
    agent: &str,
    frequency: Option<&str>,
    style: Option<String>,
) -> Result<AgentSettings> {
    let frequency = frequency
        .map(|f| {
            Frequency::parse(f).ok_or_else(|| {
                Error::InvalidInput(format!("frequency must be \"never\" or positive hours, got '{}'", f))
            })
        })
        .transpose()?;
    Ok(AgentSettings {
        agent: agent.to_string(),
        settings: ctx.engine.auto_post.update_settings(agent, frequency, style)?,
    })
}

#[derive(Serialize)]
pub struct SettingsList {
    pub enabled: bool,
    pub agents: Vec<AgentSettings>,
}

impl Output for SettingsList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Autonomous posting is {}",
            if self.enabled { "on" } else { "off" }
        )];
        lines.extend(self.agents.iter().map(|a| format!("  {}", describe_settings(a))));
        lines.join("\n")
    }
}

/// Settings of one agent, or of every agent; nothing is written.
pub fn autopost_show(ctx: &Context, agent: Option<&str>) -> Result<SettingsList> {
    let ids = match agent {
        Some(id) => {
            ctx.require_agent(id)?;
            vec![id.to_string()]
        }
        None => ctx.engine.profiles.agent_ids()?,
    };
    let mut stored = ctx.engine.auto_post.all_settings()?;
    let agents = ids
        .into_iter()
        .map(|id| AgentSettings {
            settings: stored.remove(&id).unwrap_or_default(),
            agent: id,
        })
        .collect();
    Ok(SettingsList {
        enabled: ctx.engine.toggle.is_enabled(),
        agents,
    })
}

/// Result of `autopost check`.
#[derive(Serialize)]
#[serde(untagged)]
pub enum CheckReport {
    Agent {
        #[serde(flatten)]
        check: AgentCheck,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        threads: Vec<ThreadReport>,
    },
    Sweep {
        #[serde(flatten)]
        sweep: SweepReport,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        threads: Vec<ThreadReport>,
    },
}

fn describe_check(check: &AgentCheck) -> String {
    let what = match check.outcome {
        CheckOutcome::Never => "never posts".to_string(),
        CheckOutcome::Seeded { last_auto_post_at } => {
            format!("timer seeded at {}", last_auto_post_at.format("%Y-%m-%d %H:%M"))
        }
        CheckOutcome::NotDue { due_at } => format!("next post due {}", due_at.format("%Y-%m-%d %H:%M")),
        CheckOutcome::Posted { ref post_id } => format!("posted {}", post_id),
        CheckOutcome::GenerationFailed => "generation failed, retrying next sweep".to_string(),
        CheckOutcome::Compensation { enqueued, pending } => format!(
            "was away too long ({}, {} pending)",
            if enqueued { "missed post queued" } else { "nothing queued" },
            pending
        ),
    };
    format!("{}: {}", check.agent, what)
}

impl Output for CheckReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let (mut lines, threads) = match self {
            CheckReport::Agent { check, threads } => (vec![describe_check(check)], threads),
            CheckReport::Sweep { sweep, threads } => {
                let lines = match sweep.status {
                    SweepStatus::Disabled => vec!["Autonomous posting is off; nothing checked".to_string()],
                    SweepStatus::AlreadyRunning => vec!["A sweep is already running".to_string()],
                    SweepStatus::Completed if sweep.checks.is_empty() => vec!["No agents".to_string()],
                    SweepStatus::Completed => sweep.checks.iter().map(describe_check).collect(),
                };
                (lines, threads)
            }
        };
        lines.extend(threads.iter().map(describe_thread));
        lines.join("\n")
    }
}

async fn settle_threads(ctx: &Context, checks: &[AgentCheck]) -> Result<Vec<ThreadReport>> {
    let mut threads = Vec::new();
    for check in checks {
        if let CheckOutcome::Posted { ref post_id } = check.outcome {
            threads.extend(ctx.engine.auto_post.follow_up(post_id).await?);
        }
    }
    Ok(threads)
}

/// Run the auto-post state machine now: for one agent, or as a full sweep.
pub async fn autopost_check(ctx: &Context, agent: Option<&str>, react: bool) -> Result<CheckReport> {
    match agent {
        Some(id) => {
            ctx.require_agent(id)?;
            let outcome = ctx.engine.auto_post.check_agent_at(id, Utc::now()).await?;
            let check = AgentCheck {
                agent: id.to_string(),
                outcome,
            };
            let threads = if react {
                settle_threads(ctx, std::slice::from_ref(&check)).await?
            } else {
                Vec::new()
            };
            Ok(CheckReport::Agent { check, threads })
        }
        None => {
            let sweep = ctx.engine.auto_post.sweep().await?;
            let threads = if react {
                settle_threads(ctx, &sweep.checks).await?
            } else {
                Vec::new()
            };
            Ok(CheckReport::Sweep { sweep, threads })
        }
    }
}

pub fn autopost_toggle(data_dir: &Path, enabled: bool) -> Result<super::ConfigValue> {
    config_set(Some(data_dir), "auto-post-enabled", if enabled { "true" } else { "false" })
}

// === Catch-up ===

#[derive(Serialize)]
pub struct CatchupResult {
    pub agent: String,
    pub post: Option<Post>,
    /// Slots still queued after this call
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadReport>,
}

impl Output for CatchupResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = match self.post {
            Some(ref post) => format!("Caught up {}:\n{}", self.agent, describe_post(post)),
            None => format!("Nothing posted for {}", self.agent),
        };
        out.push_str(&format!("\n{} missed post(s) still pending", self.pending));
        if let Some(ref thread) = self.thread {
            out.push('\n');
            out.push_str(&describe_thread(thread));
        }
        out
    }
}

pub async fn catchup(ctx: &Context, agent: &str, react: bool) -> Result<CatchupResult> {
    if is_self(agent) {
        return Err(Error::InvalidInput("the operator has no missed posts".to_string()));
    }
    ctx.require_agent(agent)?;
    let post = ctx.engine.auto_post.consume_compensation(agent).await?;
    let thread = match (react, post.as_ref()) {
        (true, Some(p)) => ctx.engine.auto_post.follow_up(&p.id).await?,
        _ => None,
    };
    Ok(CatchupResult {
        agent: agent.to_string(),
        pending: ctx.engine.auto_post.settings(agent)?.pending_compensation.len(),
        post,
        thread,
    })
}

// === Run loop ===

#[derive(Serialize)]
pub struct RunStopped {
    pub reason: &'static str,
}

impl Output for RunStopped {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Stopped ({})", self.reason)
    }
}

/// Sweep on the configured cadence until Ctrl-C.
pub async fn run(ctx: &Context) -> Result<RunStopped> {
    if !ctx.engine.toggle.is_enabled() {
        warn!("autonomous posting is off; sweeps will skip until it is enabled");
    }
    if ctx.config.provider_command().is_none() {
        warn!("no provider-command configured; generation will fail");
    }
    tokio::select! {
        _ = ctx.engine.auto_post.run() => Ok(RunStopped { reason: "loop ended" }),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, shutting down");
            Ok(RunStopped { reason: "interrupted" })
        }
    }
}
