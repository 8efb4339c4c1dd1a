//! Autonomous activity: posting, reacting, and comment threads.
//!
//! All delays are `tokio::time::sleep`s inside ordinary async tasks. Work
//! within one sweep or one comment round is strictly sequential; the only
//! fan-out is the independently delayed initial reaction of each agent to a
//! fresh post.

pub mod analyzer;
pub mod auto_post;
pub mod comments;
pub mod prompts;

pub use analyzer::{AnalysisOutcome, RelationshipUpdateAnalyzer};
pub use auto_post::{
    AgentCheck, AutoPostOptions, AutoPostScheduler, CheckOutcome, SweepReport, SweepStatus,
};
pub use comments::{CommentOptions, MultiRoundCommentScheduler, ThreadReport};

/// Pause between two agents of one auto-post sweep, in seconds.
pub const SWEEP_AGENT_DELAY_SECS: (u64, u64) = (1, 3);

/// Delay before a freshly generated post triggers reactions.
pub const FOLLOW_UP_DELAY_SECS: (u64, u64) = (3, 13);

/// Delay of each agent's first look at a fresh post.
pub const INITIAL_REACTION_DELAY_SECS: (u64, u64) = (5, 25);

/// Pause after each generated reply within a round.
pub const REPLY_DELAY_SECS: (u64, u64) = (2, 6);
