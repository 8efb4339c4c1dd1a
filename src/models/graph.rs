//! Node identity and canonical pair ordering for the relationship graph.
//!
//! Every relationship and rumor is keyed by an unordered pair of node ids.
//! The pair is always stored in one deterministic order (plain lexicographic
//! order of the ids) so that a single record exists per pair no matter which
//! order a caller names the two nodes in.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reserved node id for the human operator.
pub const SELF_ID: &str = "self";

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Separator used when a pair is flattened into a storage key.
const KEY_SEPARATOR: char = '|';

/// Why `id` cannot name a node, if it cannot.
///
/// Ids are flattened into pair storage keys, so they may not contain the
/// key separator.
pub fn node_id_problem(id: &str) -> Option<String> {
    if id.is_empty() {
        Some("node id must not be empty".to_string())
    } else if id.contains(KEY_SEPARATOR) {
        Some(format!("node id '{}' must not contain '{}'", id, KEY_SEPARATOR))
    } else {
        None
    }
}

/// Whether `id` is the reserved operator node.
pub fn is_self(id: &str) -> bool {
    id == SELF_ID
}

/// A canonically ordered, unordered pair of node ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    /// The lexicographically smaller id
    pub first: String,
    /// The lexicographically larger id
    pub second: String,
}

impl PairKey {
    /// Build the canonical key for two ids, in either order.
    pub fn new(a: &str, b: &str) -> Self {
        if Self::is_reversed(a, b) {
            Self {
                first: b.to_string(),
                second: a.to_string(),
            }
        } else {
            Self {
                first: a.to_string(),
                second: b.to_string(),
            }
        }
    }

    /// True when `(a, b)` is the opposite of canonical order.
    pub fn is_reversed(a: &str, b: &str) -> bool {
        a > b
    }

    /// Flatten into the string used as a map key in persisted tables.
    pub fn storage_key(&self) -> String {
        format!("{}{}{}", self.first, KEY_SEPARATOR, self.second)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.first == id || self.second == id
    }

    /// The member of the pair that is not `id`, if `id` is a member.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.first == id {
            Some(&self.second)
        } else if self.second == id {
            Some(&self.first)
        } else {
            None
        }
    }

    /// The id that is not the operator, when exactly one side is the operator.
    pub fn agent_side(&self) -> Option<&str> {
        match (is_self(&self.first), is_self(&self.second)) {
            (true, false) => Some(&self.second),
            (false, true) => Some(&self.first),
            _ => None,
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.first, self.second)
    }
}

/// Generate a unique ID for a post or comment.
///
/// Format: `<prefix>-<8 hex chars>`
/// - Post prefix: "mp"
/// - Comment prefix: "mc"
pub fn generate_id(prefix: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(ID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    let hash = hasher.finalize();
    let hash_hex = format!("{:x}", hash);
    format!("{}-{}", prefix, &hash_hex[..8])
}
