//! Per-observer rumor overlay.
//!
//! A rumor is what one observer believes about a pair. It never changes the
//! canonical record and is never shown to anyone but its observer. Saving a
//! rumor about a pair with no relationship anchors it with a ghost record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::models::{DirectionalView, PairKey, Relationship, Rumor, RumorBelief, node_id_problem};
use crate::relationships::{RelationshipStore, validate_pair};
use crate::storage::{JsonTable, KvBackend, RUMORS_KEY};
use crate::{Error, Result};

/// Where a subjective edge's fields come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    Truth,
    Rumor,
}

/// One edge as a particular observer perceives it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectiveEdge {
    /// Canonically oriented; fields replaced by the belief for rumor edges
    pub relationship: Relationship,
    pub source: EdgeSource,
}

type RumorTable = BTreeMap<String, BTreeMap<String, Rumor>>;

pub struct RumorOverlay {
    table: JsonTable<RumorTable>,
    relationships: Arc<RelationshipStore>,
}

impl RumorOverlay {
    pub fn new(backend: Arc<dyn KvBackend>, relationships: Arc<RelationshipStore>) -> Self {
        Self {
            table: JsonTable::new(backend, RUMORS_KEY),
            relationships,
        }
    }

    /// Record what `observer` believes about the pair `(a, b)`.
    ///
    /// Replaces any earlier belief of the same observer about the pair.
    pub fn save_rumor(
        &self,
        observer: &str,
        a: &str,
        b: &str,
        belief: impl Into<RumorBelief>,
    ) -> Result<Rumor> {
        if let Some(problem) = node_id_problem(observer) {
            return Err(Error::InvalidInput(problem));
        }
        let belief = belief.into();
        self.relationships.ensure_anchor(a, b)?;

        let mut rumor = Rumor {
            observer_id: observer.to_string(),
            node_a: a.to_string(),
            node_b: b.to_string(),
            a_to_b: belief.a_to_b,
            b_to_a: belief.b_to_a,
            updated_at: Utc::now(),
        };
        if PairKey::is_reversed(a, b) {
            rumor = rumor.swapped();
        }
        let key = rumor.pair_key();

        self.table.update(|table| {
            table
                .entry(observer.to_string())
                .or_default()
                .insert(key.storage_key(), rumor.clone());
            Ok(())
        })?;
        debug!(observer, pair = %key, "rumor saved");
        Ok(rumor)
    }

    /// The observer's belief about `(a, b)`, oriented from `a`.
    pub fn get_rumor(&self, observer: &str, a: &str, b: &str) -> Result<Option<Rumor>> {
        let key = validate_pair(a, b)?;
        let rumor = self
            .table
            .load()?
            .remove(observer)
            .and_then(|mut rumors| rumors.remove(&key.storage_key()));
        Ok(rumor.map(|r| if r.node_a == a { r } else { r.swapped() }))
    }

    pub fn delete_rumor(&self, observer: &str, a: &str, b: &str) -> Result<bool> {
        let key = validate_pair(a, b)?;
        self.table.update(|table| {
            let Some(rumors) = table.get_mut(observer) else {
                return Ok(false);
            };
            let removed = rumors.remove(&key.storage_key()).is_some();
            if rumors.is_empty() {
                table.remove(observer);
            }
            Ok(removed)
        })
    }

    /// Every rumor held by `observer`, in canonical orientation.
    pub fn rumors_of(&self, observer: &str) -> Result<Vec<Rumor>> {
        Ok(self
            .table
            .load()?
            .remove(observer)
            .map(|rumors| rumors.into_values().collect())
            .unwrap_or_default())
    }

    /// The graph as `observer` perceives it.
    ///
    /// An edge is included when the observer is one of its members (true
    /// data), when the observer holds a rumor about it (belief replaces the
    /// fields), or when the edge's visibility includes the observer and the
    /// observer shares a direct edge with either member. Visibility alone is
    /// not enough.
    pub fn subjective_graph(&self, observer: &str) -> Result<Vec<SubjectiveEdge>> {
        let edges = self.relationships.list_edges()?;
        let acquaintances: BTreeSet<&str> = edges
            .iter()
            .filter_map(|e| {
                if e.node_a == observer {
                    Some(e.node_b.as_str())
                } else if e.node_b == observer {
                    Some(e.node_a.as_str())
                } else {
                    None
                }
            })
            .collect();

        let mut rumors: BTreeMap<PairKey, Rumor> = self
            .rumors_of(observer)?
            .into_iter()
            .map(|r| (r.pair_key(), r))
            .collect();

        let mut graph = Vec::new();
        for edge in &edges {
            let key = edge.pair_key();
            if key.contains(observer) {
                rumors.remove(&key);
                graph.push(SubjectiveEdge {
                    relationship: edge.clone(),
                    source: EdgeSource::Truth,
                });
            } else if let Some(rumor) = rumors.remove(&key) {
                graph.push(SubjectiveEdge {
                    relationship: apply_belief(edge.clone(), &rumor),
                    source: EdgeSource::Rumor,
                });
            } else if edge.visibility.includes(observer)
                && (acquaintances.contains(key.first.as_str())
                    || acquaintances.contains(key.second.as_str()))
            {
                graph.push(SubjectiveEdge {
                    relationship: edge.clone(),
                    source: EdgeSource::Truth,
                });
            }
        }

        // Rumors about pairs with no live edge (ghost-anchored or deleted)
        for (key, rumor) in rumors {
            if key.contains(observer) {
                continue;
            }
            let anchor = Relationship::ghost(&key.first, &key.second);
            graph.push(SubjectiveEdge {
                relationship: apply_belief(anchor, &rumor),
                source: EdgeSource::Rumor,
            });
        }

        graph.sort_by_key(|e| e.relationship.pair_key());
        Ok(graph)
    }
}

/// Replace the displayed fields of a canonical edge with a rumor's belief.
fn apply_belief(mut edge: Relationship, rumor: &Rumor) -> Relationship {
    edge.a_to_b = DirectionalView {
        public_attitude: rumor.a_to_b.clone(),
        ..DirectionalView::default()
    };
    edge.b_to_a = DirectionalView {
        public_attitude: rumor.b_to_a.clone(),
        ..DirectionalView::default()
    };
    edge.backstory = None;
    edge.is_fallback = false;
    edge
}
