//! Character profile collaborator.
//!
//! The engine only reads profiles (persona, display name, status, affection,
//! and the embedded legacy relationship block). The one write it performs is
//! the explicit, user-triggered copy of a relationship record back into the
//! legacy block (`RelationshipStore::sync_to_profile`).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::models::profile::{CharacterProfile, LegacyRelationship};
use crate::models::{SELF_ID, is_self, node_id_problem};
use crate::storage::{JsonTable, KvBackend, PROFILES_KEY};
use crate::{Error, Result};

/// Read access to simulated characters.
pub trait ProfileSource: Send + Sync {
    /// Ids of every agent, excluding the operator.
    fn agent_ids(&self) -> Result<Vec<String>>;

    fn profile(&self, id: &str) -> Result<Option<CharacterProfile>>;

    /// Replace the embedded legacy relationship block of an agent.
    fn write_legacy(&self, id: &str, legacy: Option<LegacyRelationship>) -> Result<()>;

    /// Name to show in prompts; falls back to the id.
    fn display_name(&self, id: &str) -> String {
        if is_self(id) {
            return "me".to_string();
        }
        match self.profile(id) {
            Ok(Some(p)) => p.display_name,
            _ => id.to_string(),
        }
    }
}

/// Profiles stored as raw JSON under the `profiles` key.
///
/// Values may be in any shape [`CharacterProfile::from_json`] understands;
/// writes always store the canonical shape.
pub struct KvProfileSource {
    table: JsonTable<BTreeMap<String, Value>>,
}

impl KvProfileSource {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            table: JsonTable::new(backend, PROFILES_KEY),
        }
    }

    /// Store a raw profile as given.
    pub fn put_raw(&self, id: &str, value: Value) -> Result<()> {
        if let Some(problem) = node_id_problem(id) {
            return Err(Error::InvalidInput(problem));
        }
        if is_self(id) {
            return Err(Error::InvalidInput(format!(
                "'{}' is reserved for the operator",
                SELF_ID
            )));
        }
        CharacterProfile::from_json(id, &value)?;
        self.table.update(|profiles| {
            profiles.insert(id.to_string(), value);
            Ok(())
        })
    }

    pub fn put(&self, profile: &CharacterProfile) -> Result<()> {
        self.put_raw(&profile.id, profile.to_json()?)
    }

    /// Import an array of profiles; each needs an `id` (or `charId`) field.
    pub fn import(&self, values: &[Value]) -> Result<Vec<String>> {
        let mut imported = Vec::new();
        for value in values {
            let id = value
                .get("id")
                .or_else(|| value.get("charId"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidInput("profile without an id".to_string()))?
                .to_string();
            self.put_raw(&id, value.clone())?;
            imported.push(id);
        }
        Ok(imported)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.table.update(|profiles| Ok(profiles.remove(id).is_some()))
    }

    pub fn all(&self) -> Result<Vec<CharacterProfile>> {
        self.table
            .load()?
            .iter()
            .map(|(id, value)| CharacterProfile::from_json(id, value))
            .collect()
    }
}

impl ProfileSource for KvProfileSource {
    fn agent_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .table
            .load()?
            .into_keys()
            .filter(|id| !is_self(id))
            .collect())
    }

    fn profile(&self, id: &str) -> Result<Option<CharacterProfile>> {
        match self.table.load()?.get(id) {
            Some(value) => Ok(Some(CharacterProfile::from_json(id, value)?)),
            None => Ok(None),
        }
    }

    fn write_legacy(&self, id: &str, legacy: Option<LegacyRelationship>) -> Result<()> {
        self.table.update(|profiles| {
            let value = profiles
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("profile {}", id)))?;
            let mut profile = CharacterProfile::from_json(id, value)?;
            profile.legacy = legacy.filter(|l| !l.is_empty());
            profiles.insert(id.to_string(), profile.to_json()?);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use serde_json::json;

    fn source() -> KvProfileSource {
        KvProfileSource::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_import_and_list() {
        let profiles = source();
        let ids = profiles
            .import(&[
                json!({"id": "b", "name": "Bea"}),
                json!({"charId": "a", "nickname": "Al"}),
            ])
            .unwrap();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(profiles.agent_ids().unwrap(), vec!["a", "b"]);
        assert_eq!(profiles.display_name("a"), "Al");
        assert_eq!(profiles.display_name("missing"), "missing");
        assert_eq!(profiles.display_name(SELF_ID), "me");
    }

    #[test]
    fn test_import_requires_id() {
        let profiles = source();
        assert!(profiles.import(&[json!({"name": "x"})]).is_err());
    }

    #[test]
    fn test_import_rejects_separator_in_id() {
        let profiles = source();
        assert!(matches!(
            profiles.import(&[json!({"id": "a|b", "name": "Ab"})]),
            Err(Error::InvalidInput(_))
        ));
        assert!(profiles.agent_ids().unwrap().is_empty());
    }

    #[test]
    fn test_self_id_is_reserved() {
        let profiles = source();
        assert!(profiles.put_raw(SELF_ID, json!({"name": "me"})).is_err());
    }

    #[test]
    fn test_write_legacy_rewrites_canonical_shape() {
        let profiles = source();
        profiles
            .put_raw("c", json!({"name": "C", "relation": "friend"}))
            .unwrap();

        let mut legacy = profiles.profile("c").unwrap().unwrap().legacy.unwrap();
        legacy.char_public_attitude = Some("cheerful".to_string());
        profiles.write_legacy("c", Some(legacy.clone())).unwrap();

        let profile = profiles.profile("c").unwrap().unwrap();
        assert_eq!(profile.legacy, Some(legacy));
        assert_eq!(profile.display_name, "C");

        profiles.write_legacy("c", None).unwrap();
        assert!(profiles.profile("c").unwrap().unwrap().legacy.is_none());
        assert!(profiles.write_legacy("missing", None).is_err());
    }
}
