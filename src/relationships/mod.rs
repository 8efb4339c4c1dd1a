//! Relationship graph storage.
//!
//! One persisted record exists per unordered pair, keyed by [`PairKey`] and
//! stored in canonical orientation. Reads can be made in either order; the
//! result is oriented the way the caller named the pair.
//!
//! ## Fallback relationships
//!
//! An agent profile may embed a legacy relationship block toward the operator.
//! When it does, reads of `(agent, self)` see it as a baseline under whatever
//! is persisted: persisted fields win field by field, unset persisted fields
//! fall through to the profile. A tombstoned record suppresses the fallback
//! entirely, which is why deleting a pair that has a fallback writes a
//! tombstone instead of erasing the record.

pub mod rumor;

pub use rumor::{EdgeSource, RumorOverlay, SubjectiveEdge};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::profile::LegacyRelationship;
use crate::models::{DirectionalPatch, PairKey, Relationship, SELF_ID, node_id_problem};
use crate::profiles::ProfileSource;
use crate::storage::{JsonTable, KvBackend, RELATIONSHIPS_KEY};
use crate::{Error, Result};

/// What `delete` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// A tombstone now hides the profile fallback
    Tombstoned,
    /// The record was erased
    Removed,
    /// Nothing was stored for the pair
    NotFound,
}

/// Canonical relationship records merged with profile fallbacks.
pub struct RelationshipStore {
    table: JsonTable<BTreeMap<String, Relationship>>,
    profiles: Arc<dyn ProfileSource>,
}

impl RelationshipStore {
    pub fn new(backend: Arc<dyn KvBackend>, profiles: Arc<dyn ProfileSource>) -> Self {
        Self {
            table: JsonTable::new(backend, RELATIONSHIPS_KEY),
            profiles,
        }
    }

    /// Read the relationship between `a` and `b`, oriented from `a`.
    pub fn get(&self, a: &str, b: &str) -> Result<Option<Relationship>> {
        let key = validate_pair(a, b)?;
        let persisted = self.table.load()?.remove(&key.storage_key());
        Ok(self.resolve(&key, persisted)?.map(|r| r.oriented_from(a)))
    }

    /// Merge a persisted record (canonical) with the fallback for its pair.
    fn resolve(
        &self,
        key: &PairKey,
        persisted: Option<Relationship>,
    ) -> Result<Option<Relationship>> {
        let persisted = match persisted {
            Some(p) if p.is_deleted => return Ok(None),
            Some(p) if p.is_ghost() => None,
            other => other,
        };
        let fallback = self.fallback(key)?;
        Ok(match (persisted, fallback) {
            (None, None) => None,
            (Some(p), None) => Some(p),
            (None, Some(f)) => Some(f),
            (Some(p), Some(f)) => Some(p.merged_over(&f)),
        })
    }

    /// The profile-derived relationship for the pair, in canonical orientation.
    fn fallback(&self, key: &PairKey) -> Result<Option<Relationship>> {
        let Some(agent) = key.agent_side() else {
            return Ok(None);
        };
        Ok(self
            .profiles
            .profile(agent)?
            .and_then(|p| p.fallback_relationship())
            .map(Relationship::canonical))
    }

    /// Persist a full relationship.
    ///
    /// `data` may be oriented either way; direction fields are swapped into
    /// canonical orientation before writing. Returns the stored record
    /// oriented as `data` was.
    pub fn save(&self, data: Relationship) -> Result<Relationship> {
        let key = validate_pair(&data.node_a, &data.node_b)?;
        let caller_a = data.node_a.clone();
        let mut record = data.canonical();
        record.is_deleted = false;
        record.is_fallback = false;
        record.updated_at = Utc::now();

        let stored = self.table.update(|map| {
            if let Some(existing) = map.get(&key.storage_key()) {
                record.created_at = existing.created_at;
            }
            map.insert(key.storage_key(), record.clone());
            Ok(record)
        })?;
        info!(pair = %key, "relationship saved");
        Ok(stored.oriented_from(&caller_a))
    }

    /// Update only how `subject` regards `object`.
    ///
    /// The opposite direction, the backstory, and the visibility are left
    /// untouched. Returns `false` without writing when the pair is
    /// tombstoned: only an explicit `save` revives a deleted relationship.
    pub fn update_incremental(
        &self,
        subject: &str,
        object: &str,
        patch: &DirectionalPatch,
    ) -> Result<bool> {
        let key = validate_pair(subject, object)?;
        let updated = self.table.update(|map| {
            let record = map
                .entry(key.storage_key())
                .or_insert_with(|| Relationship::new(&key.first, &key.second));
            if record.is_deleted {
                return Ok(false);
            }
            if record.is_ghost() {
                record.visibility = Default::default();
            }
            if let Some(view) = record.view_from_mut(subject) {
                view.apply(patch);
            }
            record.updated_at = Utc::now();
            Ok(true)
        })?;
        if updated {
            debug!(subject, object, "relationship direction updated");
        } else {
            debug!(subject, object, "skipped update of deleted relationship");
        }
        Ok(updated)
    }

    /// Delete the relationship between `a` and `b`.
    ///
    /// With a profile fallback for the pair a tombstone is written so the
    /// fallback can never resurface; otherwise the record is erased.
    pub fn delete(&self, a: &str, b: &str) -> Result<DeleteOutcome> {
        let key = validate_pair(a, b)?;
        let has_fallback = self.fallback(&key)?.is_some();
        let outcome = self.table.update(|map| {
            if has_fallback {
                let mut tombstone = Relationship::tombstone(&key.first, &key.second);
                if let Some(existing) = map.get(&key.storage_key()) {
                    tombstone.created_at = existing.created_at;
                }
                map.insert(key.storage_key(), tombstone);
                Ok(DeleteOutcome::Tombstoned)
            } else if map.remove(&key.storage_key()).is_some() {
                Ok(DeleteOutcome::Removed)
            } else {
                Ok(DeleteOutcome::NotFound)
            }
        })?;
        info!(pair = %key, ?outcome, "relationship deleted");
        Ok(outcome)
    }

    /// Copy the persisted record into the agent profile's legacy block.
    ///
    /// Only meaningful when one side of the pair is the operator.
    pub fn sync_to_profile(&self, a: &str, b: &str) -> Result<()> {
        let key = validate_pair(a, b)?;
        let agent = operator_pair_agent(&key)?;
        let record = self
            .table
            .load()?
            .remove(&key.storage_key())
            .filter(|r| !r.is_deleted && !r.is_ghost())
            .ok_or_else(|| Error::NotFound(format!("relationship {}", key)))?;
        let legacy = LegacyRelationship::from_relationship(&record.oriented_from(agent));
        self.profiles.write_legacy(agent, Some(legacy))?;
        info!(pair = %key, "relationship copied to profile");
        Ok(())
    }

    /// Copy the profile's legacy block into a persisted record.
    ///
    /// Overwrites the persisted record (clearing any tombstone); keeps an
    /// existing record's visibility.
    pub fn sync_from_profile(&self, a: &str, b: &str) -> Result<Relationship> {
        let key = validate_pair(a, b)?;
        operator_pair_agent(&key)?;
        let mut record = self
            .fallback(&key)?
            .ok_or_else(|| Error::NotFound(format!("profile relationship {}", key)))?;
        if let Some(existing) = self.table.load()?.get(&key.storage_key()) {
            if !existing.is_deleted && !existing.is_ghost() {
                record.visibility = existing.visibility.clone();
            }
        }
        record.is_fallback = false;
        let saved = self.save(record)?;
        Ok(saved.oriented_from(a))
    }

    /// Every live edge in canonical orientation, fallback-only edges included.
    ///
    /// Ghost and tombstoned records are not edges.
    pub fn list_edges(&self) -> Result<Vec<Relationship>> {
        let mut persisted = self.table.load()?;
        let mut edges = Vec::new();

        for record in persisted.values() {
            let key = record.pair_key();
            if let Some(edge) = self.resolve(&key, Some(record.clone()))? {
                edges.push(edge);
            }
        }

        for agent in self.profiles.agent_ids()? {
            let key = PairKey::new(&agent, SELF_ID);
            if persisted.remove(&key.storage_key()).is_some() {
                continue;
            }
            if let Some(fallback) = self.fallback(&key)? {
                edges.push(fallback);
            }
        }

        edges.sort_by_key(|e| e.pair_key());
        Ok(edges)
    }

    /// Whether any live edge connects `a` and `b`.
    pub fn has_edge(&self, a: &str, b: &str) -> Result<bool> {
        if a == b || node_id_problem(a).is_some() || node_id_problem(b).is_some() {
            return Ok(false);
        }
        Ok(self.get(a, b)?.is_some())
    }

    /// Nodes sharing a live edge with `id`.
    pub fn neighbors(&self, id: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .list_edges()?
            .iter()
            .filter_map(|e| e.pair_key().other(id).map(str::to_string))
            .collect())
    }

    /// Make sure some record anchors the pair, creating a ghost if needed.
    ///
    /// Returns `true` when a ghost was written.
    pub fn ensure_anchor(&self, a: &str, b: &str) -> Result<bool> {
        let key = validate_pair(a, b)?;
        if self.fallback(&key)?.is_some() {
            return Ok(false);
        }
        let created = self.table.update(|map| {
            if map.contains_key(&key.storage_key()) {
                return Ok(false);
            }
            map.insert(
                key.storage_key(),
                Relationship::ghost(&key.first, &key.second),
            );
            Ok(true)
        })?;
        if created {
            debug!(pair = %key, "ghost relationship created");
        }
        Ok(created)
    }
}

pub(crate) fn validate_pair(a: &str, b: &str) -> Result<PairKey> {
    if let Some(problem) = node_id_problem(a).or_else(|| node_id_problem(b)) {
        return Err(Error::InvalidInput(problem));
    }
    if a == b {
        return Err(Error::InvalidInput(format!(
            "a node cannot have a relationship with itself: {}",
            a
        )));
    }
    Ok(PairKey::new(a, b))
}

fn operator_pair_agent(key: &PairKey) -> Result<&str> {
    key.agent_side().ok_or_else(|| {
        Error::InvalidInput(format!(
            "profile sync needs the operator on one side of the pair, got {}",
            key
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DirectionalView, Visibility};
    use crate::test_utils::TestEnv;

    fn full_relationship(a: &str, b: &str) -> Relationship {
        let mut rel = Relationship::new(a, b);
        rel.a_to_b = DirectionalView {
            public_label: Some("mentor".to_string()),
            public_attitude: Some("patient".to_string()),
            private_attitude: Some("worried".to_string()),
            counterpart_knows_private: true,
        };
        rel.b_to_a = DirectionalView {
            public_label: Some("student".to_string()),
            public_attitude: Some("eager".to_string()),
            private_attitude: Some("intimidated".to_string()),
            counterpart_knows_private: false,
        };
        rel.backstory = Some("met at the conservatory".to_string());
        rel
    }

    #[test]
    fn test_get_is_order_independent() {
        let env = TestEnv::new();
        env.relationships.save(full_relationship("zed", "amy")).unwrap();

        let forward = env.relationships.get("zed", "amy").unwrap().unwrap();
        let backward = env.relationships.get("amy", "zed").unwrap().unwrap();
        assert_eq!(forward.node_a, "zed");
        assert_eq!(backward.node_a, "amy");
        assert_eq!(forward.clone().swapped(), backward);
        assert_eq!(forward.a_to_b.public_label.as_deref(), Some("mentor"));
        assert_eq!(backward.b_to_a.public_label.as_deref(), Some("mentor"));
    }

    #[test]
    fn test_single_record_per_pair() {
        let env = TestEnv::new();
        env.relationships.save(full_relationship("zed", "amy")).unwrap();
        env.relationships.save(full_relationship("amy", "zed")).unwrap();
        let map = env.relationships.table.load().unwrap();
        assert_eq!(map.len(), 1);
        let stored = map.values().next().unwrap();
        assert_eq!(stored.node_a, "amy");
        // second save named amy first, so amy is the mentor now
        assert_eq!(stored.a_to_b.public_label.as_deref(), Some("mentor"));
    }

    #[test]
    fn test_save_then_get_is_idempotent_in_any_order() {
        let env = TestEnv::new();
        let data = full_relationship("zed", "amy");
        env.relationships.save(data.clone()).unwrap();

        let read = env.relationships.get("zed", "amy").unwrap().unwrap();
        assert_eq!(read.a_to_b, data.a_to_b);
        assert_eq!(read.b_to_a, data.b_to_a);
        assert_eq!(read.backstory, data.backstory);

        let reversed = env.relationships.get("amy", "zed").unwrap().unwrap();
        assert_eq!(reversed.b_to_a, data.a_to_b);
    }

    #[test]
    fn test_fallback_used_when_nothing_persisted() {
        let env = TestEnv::new();
        env.add_agent_with_legacy("c1", "Cee", "best friend", "loyal");

        let rel = env.relationships.get(SELF_ID, "c1").unwrap().unwrap();
        assert!(rel.is_fallback);
        assert_eq!(rel.node_a, SELF_ID);
        assert_eq!(rel.b_to_a.public_label.as_deref(), Some("best friend"));
        assert_eq!(rel.b_to_a.public_attitude.as_deref(), Some("loyal"));
    }

    #[test]
    fn test_persisted_fields_win_over_fallback() {
        let env = TestEnv::new();
        env.add_agent_with_legacy("c1", "Cee", "best friend", "loyal");
        env.relationships
            .update_incremental("c1", SELF_ID, &DirectionalPatch::private_attitude("jealous"))
            .unwrap();
        let mut patch = DirectionalPatch::default();
        patch.public_label = Some("rival".to_string());
        env.relationships
            .update_incremental("c1", SELF_ID, &patch)
            .unwrap();

        let rel = env.relationships.get("c1", SELF_ID).unwrap().unwrap();
        assert!(!rel.is_fallback);
        assert_eq!(rel.a_to_b.public_label.as_deref(), Some("rival"));
        assert_eq!(rel.a_to_b.public_attitude.as_deref(), Some("loyal"));
        assert_eq!(rel.a_to_b.private_attitude.as_deref(), Some("jealous"));
    }

    #[test]
    fn test_delete_with_fallback_writes_tombstone() {
        let env = TestEnv::new();
        env.add_agent_with_legacy("c1", "Cee", "best friend", "loyal");

        let outcome = env.relationships.delete("c1", SELF_ID).unwrap();
        assert_eq!(outcome, DeleteOutcome::Tombstoned);
        assert!(env.relationships.get("c1", SELF_ID).unwrap().is_none());
        assert!(env.relationships.get(SELF_ID, "c1").unwrap().is_none());
        assert!(!env.relationships.has_edge("c1", SELF_ID).unwrap());
        assert!(env.relationships.list_edges().unwrap().is_empty());

        // automation cannot revive it
        let revived = env
            .relationships
            .update_incremental("c1", SELF_ID, &DirectionalPatch::private_attitude("x"))
            .unwrap();
        assert!(!revived);
        assert!(env.relationships.get("c1", SELF_ID).unwrap().is_none());

        // an explicit save does
        env.relationships.save(Relationship::new("c1", SELF_ID)).unwrap();
        assert!(env.relationships.get("c1", SELF_ID).unwrap().is_some());
    }

    #[test]
    fn test_delete_without_fallback_erases() {
        let env = TestEnv::new();
        env.relationships.save(full_relationship("a", "b")).unwrap();
        assert_eq!(env.relationships.delete("b", "a").unwrap(), DeleteOutcome::Removed);
        assert!(env.relationships.table.load().unwrap().is_empty());
        assert_eq!(env.relationships.delete("a", "b").unwrap(), DeleteOutcome::NotFound);
    }

    #[test]
    fn test_update_incremental_leaves_other_direction() {
        let env = TestEnv::new();
        env.relationships.save(full_relationship("amy", "zed")).unwrap();
        env.relationships
            .update_incremental("zed", "amy", &DirectionalPatch::private_attitude("grateful"))
            .unwrap();

        let rel = env.relationships.get("amy", "zed").unwrap().unwrap();
        assert_eq!(rel.b_to_a.private_attitude.as_deref(), Some("grateful"));
        assert_eq!(rel.b_to_a.public_label.as_deref(), Some("student"));
        assert_eq!(rel.a_to_b.private_attitude.as_deref(), Some("worried"));
        assert_eq!(rel.backstory.as_deref(), Some("met at the conservatory"));
    }

    #[test]
    fn test_update_incremental_creates_missing_record() {
        let env = TestEnv::new();
        assert!(
            env.relationships
                .update_incremental("b", "a", &DirectionalPatch::private_attitude("curious"))
                .unwrap()
        );
        let rel = env.relationships.get("b", "a").unwrap().unwrap();
        assert_eq!(rel.a_to_b.private_attitude.as_deref(), Some("curious"));
        assert!(rel.b_to_a.is_empty());
        assert_eq!(rel.visibility, Visibility::All);
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        let env = TestEnv::new();
        assert!(env.relationships.get("a", "a").is_err());
        assert!(env.relationships.get("", "a").is_err());
        assert!(!env.relationships.has_edge("a", "a").unwrap());
    }

    #[test]
    fn test_sync_to_profile_and_back() {
        let env = TestEnv::new();
        env.add_agent("c1", "Cee", "");
        let mut rel = Relationship::new(SELF_ID, "c1");
        rel.b_to_a.public_label = Some("neighbor".to_string());
        rel.a_to_b.public_attitude = Some("amused".to_string());
        env.relationships.save(rel).unwrap();

        env.relationships.sync_to_profile("c1", SELF_ID).unwrap();
        let legacy = env.profiles.profile("c1").unwrap().unwrap().legacy.unwrap();
        assert_eq!(legacy.char_label.as_deref(), Some("neighbor"));
        assert_eq!(legacy.user_public_attitude.as_deref(), Some("amused"));

        env.relationships.delete(SELF_ID, "c1").unwrap();
        assert!(env.relationships.get(SELF_ID, "c1").unwrap().is_none());

        let restored = env.relationships.sync_from_profile(SELF_ID, "c1").unwrap();
        assert_eq!(restored.node_a, SELF_ID);
        assert_eq!(restored.b_to_a.public_label.as_deref(), Some("neighbor"));
        assert!(env.relationships.get("c1", SELF_ID).unwrap().is_some());
    }

    #[test]
    fn test_sync_requires_operator_side() {
        let env = TestEnv::new();
        env.relationships.save(full_relationship("a", "b")).unwrap();
        assert!(matches!(
            env.relationships.sync_to_profile("a", "b"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            env.relationships.sync_from_profile("a", "b"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_list_edges_includes_fallback_only_pairs() {
        let env = TestEnv::new();
        env.add_agent_with_legacy("c1", "Cee", "sister", "protective");
        env.add_agent("c2", "Dee", "");
        env.relationships.save(full_relationship("c1", "c2")).unwrap();
        env.relationships.ensure_anchor("c2", "c3").unwrap();

        let edges = env.relationships.list_edges().unwrap();
        let keys: Vec<String> = edges.iter().map(|e| e.pair_key().storage_key()).collect();
        assert_eq!(keys, vec!["c1|c2", "c1|self"]);
        assert_eq!(
            env.relationships.neighbors("c1").unwrap(),
            BTreeSet::from(["c2".to_string(), SELF_ID.to_string()])
        );
    }

    #[test]
    fn test_ids_with_separator_rejected() {
        let env = TestEnv::new();
        let mut rival = Relationship::new("a|b", "c");
        rival.a_to_b.public_label = Some("rival".to_string());
        assert!(matches!(env.relationships.save(rival), Err(Error::InvalidInput(_))));

        let mut lover = Relationship::new("a", "b|c");
        lover.a_to_b.public_label = Some("lover".to_string());
        assert!(matches!(env.relationships.save(lover), Err(Error::InvalidInput(_))));

        assert!(matches!(env.relationships.get("a|b", "c"), Err(Error::InvalidInput(_))));
        assert!(!env.relationships.has_edge("a", "b|c").unwrap());
        assert!(env.relationships.list_edges().unwrap().is_empty());
    }

    #[test]
    fn test_ghost_is_not_an_edge() {
        let env = TestEnv::new();
        assert!(env.relationships.ensure_anchor("a", "b").unwrap());
        assert!(!env.relationships.ensure_anchor("b", "a").unwrap());
        assert!(env.relationships.get("a", "b").unwrap().is_none());
        assert!(!env.relationships.has_edge("a", "b").unwrap());
    }
}
