//! Data models for Murmur entities.
//!
//! This module defines the core data structures:
//! - `Relationship` - One record per unordered node pair with a view per direction
//! - `Rumor` - An observer's private belief about a pair, independent of the record
//! - `Post` / `Comment` - The feed that agents and the operator write to
//! - `AutoPostSettings` - Per-agent autonomous posting state

pub mod graph;
pub mod profile;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

pub use graph::{PairKey, SELF_ID, is_self, node_id_problem};

/// Who may see a relationship edge.
///
/// Serialized as the string `"all"` or as an array of observer ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VisibilityRepr", into = "VisibilityRepr")]
pub enum Visibility {
    /// Every observer in scope
    #[default]
    All,
    /// Only the listed observers. An empty set hides the edge from everyone.
    Observers(BTreeSet<String>),
}

impl Visibility {
    /// Whether `observer` is inside this scope.
    pub fn includes(&self, observer: &str) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Observers(ids) => ids.contains(observer),
        }
    }

    pub fn hidden() -> Self {
        Visibility::Observers(BTreeSet::new())
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Visibility::Observers(ids) if ids.is_empty())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum VisibilityRepr {
    Sentinel(String),
    Observers(BTreeSet<String>),
}

impl TryFrom<VisibilityRepr> for Visibility {
    type Error = String;

    fn try_from(repr: VisibilityRepr) -> Result<Self, Self::Error> {
        match repr {
            VisibilityRepr::Sentinel(s) if s == "all" => Ok(Visibility::All),
            VisibilityRepr::Sentinel(s) => Err(format!("unknown visibility sentinel: {}", s)),
            VisibilityRepr::Observers(ids) => Ok(Visibility::Observers(ids)),
        }
    }
}

impl From<Visibility> for VisibilityRepr {
    fn from(v: Visibility) -> Self {
        match v {
            Visibility::All => VisibilityRepr::Sentinel("all".to_string()),
            Visibility::Observers(ids) => VisibilityRepr::Observers(ids),
        }
    }
}

/// How one side of a pair regards the other.
///
/// `None` means "not set" and lets a lower-precedence source fill the field in.
/// An explicitly saved empty string is `Some("")` and is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalView {
    /// Label everyone is told (e.g. "colleague", "childhood friend")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_label: Option<String>,

    /// Attitude shown in public
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_attitude: Option<String>,

    /// What this side actually thinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_attitude: Option<String>,

    /// Whether the other side knows the private attitude
    #[serde(default)]
    pub counterpart_knows_private: bool,
}

impl DirectionalView {
    /// Field-by-field merge where `self` wins over `base` for every set field.
    pub fn merged_over(&self, base: &DirectionalView) -> DirectionalView {
        DirectionalView {
            public_label: self.public_label.clone().or_else(|| base.public_label.clone()),
            public_attitude: self
                .public_attitude
                .clone()
                .or_else(|| base.public_attitude.clone()),
            private_attitude: self
                .private_attitude
                .clone()
                .or_else(|| base.private_attitude.clone()),
            counterpart_knows_private: self.counterpart_knows_private,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.public_label.is_none()
            && self.public_attitude.is_none()
            && self.private_attitude.is_none()
            && !self.counterpart_knows_private
    }

    /// All free text of this view joined for keyword matching.
    pub fn text(&self) -> String {
        [
            self.public_label.as_deref(),
            self.public_attitude.as_deref(),
            self.private_attitude.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Apply only the fields present in `patch`.
    pub fn apply(&mut self, patch: &DirectionalPatch) {
        if let Some(ref v) = patch.public_label {
            self.public_label = Some(v.clone());
        }
        if let Some(ref v) = patch.public_attitude {
            self.public_attitude = Some(v.clone());
        }
        if let Some(ref v) = patch.private_attitude {
            self.private_attitude = Some(v.clone());
        }
        if let Some(v) = patch.counterpart_knows_private {
            self.counterpart_knows_private = v;
        }
    }
}

/// A partial update to one direction of a relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalPatch {
    pub public_label: Option<String>,
    pub public_attitude: Option<String>,
    pub private_attitude: Option<String>,
    pub counterpart_knows_private: Option<bool>,
}

impl DirectionalPatch {
    pub fn private_attitude(text: impl Into<String>) -> Self {
        Self {
            private_attitude: Some(text.into()),
            ..Self::default()
        }
    }
}

/// The relationship between two nodes.
///
/// `node_a`/`node_b` describe the orientation of the value in hand: `a_to_b`
/// is how `node_a` regards `node_b`. Persisted records are always stored in
/// canonical orientation; values handed to callers are oriented the way the
/// caller asked for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub node_a: String,
    pub node_b: String,

    /// How `node_a` regards `node_b`
    #[serde(default)]
    pub a_to_b: DirectionalView,

    /// How `node_b` regards `node_a`
    #[serde(default)]
    pub b_to_a: DirectionalView,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,

    #[serde(default)]
    pub visibility: Visibility,

    /// Tombstone: the pair reads as "no relationship", fallback included
    #[serde(default)]
    pub is_deleted: bool,

    /// Synthesized from a profile on read; never persisted
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_fallback: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Create an empty, publicly visible relationship oriented as `(a, b)`.
    pub fn new(a: &str, b: &str) -> Self {
        let now = Utc::now();
        Self {
            node_a: a.to_string(),
            node_b: b.to_string(),
            a_to_b: DirectionalView::default(),
            b_to_a: DirectionalView::default(),
            backstory: None,
            visibility: Visibility::All,
            is_deleted: false,
            is_fallback: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// An empty record invisible to everyone, used only to anchor rumors.
    pub fn ghost(a: &str, b: &str) -> Self {
        Self {
            visibility: Visibility::hidden(),
            ..Self::new(a, b)
        }
    }

    /// A deleted marker that suppresses the profile fallback for this pair.
    pub fn tombstone(a: &str, b: &str) -> Self {
        Self {
            is_deleted: true,
            ..Self::new(a, b)
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.node_a, &self.node_b)
    }

    /// The same relationship seen from the other side.
    pub fn swapped(self) -> Self {
        Self {
            node_a: self.node_b,
            node_b: self.node_a,
            a_to_b: self.b_to_a,
            b_to_a: self.a_to_b,
            ..self
        }
    }

    /// Orient so that `node_a == from`. No-op if `from` is not `node_b`.
    pub fn oriented_from(self, from: &str) -> Self {
        if self.node_b == from && self.node_a != from {
            self.swapped()
        } else {
            self
        }
    }

    /// Orient into canonical storage order.
    pub fn canonical(self) -> Self {
        if PairKey::is_reversed(&self.node_a, &self.node_b) {
            self.swapped()
        } else {
            self
        }
    }

    /// How `from` regards the other member, if `from` is a member.
    pub fn view_from(&self, from: &str) -> Option<&DirectionalView> {
        if self.node_a == from {
            Some(&self.a_to_b)
        } else if self.node_b == from {
            Some(&self.b_to_a)
        } else {
            None
        }
    }

    pub fn view_from_mut(&mut self, from: &str) -> Option<&mut DirectionalView> {
        if self.node_a == from {
            Some(&mut self.a_to_b)
        } else if self.node_b == from {
            Some(&mut self.b_to_a)
        } else {
            None
        }
    }

    /// Whether this is an anchor-only record with no content of its own.
    pub fn is_ghost(&self) -> bool {
        !self.is_deleted
            && self.visibility.is_hidden()
            && self.a_to_b.is_empty()
            && self.b_to_a.is_empty()
            && self.backstory.is_none()
    }

    /// Merge `self` (persisted) over `base` (fallback). Both must share orientation.
    pub fn merged_over(&self, base: &Relationship) -> Relationship {
        Relationship {
            node_a: self.node_a.clone(),
            node_b: self.node_b.clone(),
            a_to_b: self.a_to_b.merged_over(&base.a_to_b),
            b_to_a: self.b_to_a.merged_over(&base.b_to_a),
            backstory: self.backstory.clone().or_else(|| base.backstory.clone()),
            visibility: self.visibility.clone(),
            is_deleted: false,
            is_fallback: false,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// An observer's private belief about a pair.
///
/// Stored in canonical orientation like relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rumor {
    pub observer_id: String,
    pub node_a: String,
    pub node_b: String,

    /// What the observer believes `node_a` thinks of `node_b`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a_to_b: Option<String>,

    /// What the observer believes `node_b` thinks of `node_a`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b_to_a: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Rumor {
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.node_a, &self.node_b)
    }

    pub fn swapped(self) -> Self {
        Self {
            node_a: self.node_b,
            node_b: self.node_a,
            a_to_b: self.b_to_a,
            b_to_a: self.a_to_b,
            ..self
        }
    }
}

/// Belief text handed to the rumor overlay, oriented as the caller named the pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RumorBelief {
    pub a_to_b: Option<String>,
    pub b_to_a: Option<String>,
}

impl From<&str> for RumorBelief {
    fn from(text: &str) -> Self {
        Self {
            a_to_b: Some(text.to_string()),
            b_to_a: None,
        }
    }
}

impl From<String> for RumorBelief {
    fn from(text: String) -> Self {
        Self {
            a_to_b: Some(text),
            b_to_a: None,
        }
    }
}

/// Audience of a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PostVisibility {
    /// Every friend of the author
    #[default]
    All,
    /// The author plus an explicit allow-list
    Partial { allow: BTreeSet<String> },
    /// The author only
    Private,
}

impl PostVisibility {
    /// Parse from CLI input: "all", "private", or "partial".
    pub fn parse(s: &str, allow: &[String]) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" | "public" => Some(Self::All),
            "private" => Some(Self::Private),
            "partial" => Some(Self::Partial {
                allow: allow.iter().cloned().collect(),
            }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Partial { .. } => "partial",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for PostVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A comment in a post's thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_author_id: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// A top-level comment.
    pub fn new(id: String, author_id: &str, text: impl Into<String>) -> Self {
        Self {
            id,
            author_id: author_id.to_string(),
            reply_to_comment_id: None,
            reply_to_author_id: None,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// A reply to `target`.
    pub fn reply(id: String, author_id: &str, target: &Comment, text: impl Into<String>) -> Self {
        Self {
            reply_to_comment_id: Some(target.id.clone()),
            reply_to_author_id: Some(target.author_id.clone()),
            ..Self::new(id, author_id, text)
        }
    }
}

/// A post in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub text: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub visibility: PostVisibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub ai_generated: bool,
}

impl Post {
    pub fn new(id: String, author_id: &str, text: impl Into<String>) -> Self {
        Self {
            id,
            author_id: author_id.to_string(),
            text: text.into(),
            media: Vec::new(),
            created_at: Utc::now(),
            likes: BTreeSet::new(),
            comments: Vec::new(),
            visibility: PostVisibility::All,
            location: None,
            ai_generated: false,
        }
    }

    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }
}

/// How often an agent posts on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrequencyRepr", into = "FrequencyRepr")]
pub enum Frequency {
    #[default]
    Never,
    /// Mean hours between posts
    Hours(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FrequencyRepr {
    Sentinel(String),
    Hours(f64),
}

impl TryFrom<FrequencyRepr> for Frequency {
    type Error = String;

    fn try_from(repr: FrequencyRepr) -> Result<Self, Self::Error> {
        match repr {
            FrequencyRepr::Sentinel(s) => {
                Frequency::parse(&s).ok_or_else(|| format!("invalid frequency: {}", s))
            }
            FrequencyRepr::Hours(h) if h > 0.0 => Ok(Frequency::Hours(h)),
            FrequencyRepr::Hours(h) => Err(format!("frequency must be positive, got {}", h)),
        }
    }
}

impl From<Frequency> for FrequencyRepr {
    fn from(f: Frequency) -> Self {
        match f {
            Frequency::Never => FrequencyRepr::Sentinel("never".to_string()),
            Frequency::Hours(h) => FrequencyRepr::Hours(h),
        }
    }
}

/// Longest accepted posting interval: one year.
pub const MAX_FREQUENCY_HOURS: f64 = 24.0 * 365.0;

impl Frequency {
    /// Parse "never" or a positive number of hours, at most a year.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("never") {
            return Some(Frequency::Never);
        }
        match s.parse::<f64>() {
            Ok(h) if h > 0.0 && h <= MAX_FREQUENCY_HOURS => Some(Frequency::Hours(h)),
            _ => None,
        }
    }

    /// The posting interval, or `None` for "never".
    ///
    /// Stored values above [`MAX_FREQUENCY_HOURS`] are read as the maximum.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Frequency::Never => None,
            Frequency::Hours(h) => Some(Duration::milliseconds(
                (h.min(MAX_FREQUENCY_HOURS) * 3_600_000.0) as i64,
            )),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Never => write!(f, "never"),
            Frequency::Hours(h) => write!(f, "{}h", h),
        }
    }
}

/// Per-agent autonomous posting state, created lazily with defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoPostSettings {
    #[serde(default)]
    pub frequency: Frequency,

    /// Free-text style guidance passed to the language model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_hint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_auto_post_at: Option<DateTime<Utc>>,

    /// Historical instants waiting to be backfilled, oldest first
    #[serde(default)]
    pub pending_compensation: VecDeque<DateTime<Utc>>,
}
