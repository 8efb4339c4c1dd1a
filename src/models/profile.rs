//! Character profiles and the legacy field mapping.
//!
//! Profiles reach the engine in two shapes: the canonical shape written by
//! this crate (`schema_version: 2`), and the older loosely-keyed shape where the
//! same value could live under several alternate names. Both are translated
//! into [`CharacterProfile`] once, here, so nothing downstream looks at raw
//! profile JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{DirectionalView, Relationship, SELF_ID, Visibility};
use crate::{Error, Result};

/// Current canonical profile schema version.
pub const PROFILE_SCHEMA_VERSION: u32 = 2;

const NAME_KEYS: &[&str] = &["displayName", "display_name", "name", "nickname", "charName"];
const PERSONA_KEYS: &[&str] = &["persona", "personality", "description", "setting"];
const AFFECTION_KEYS: &[&str] = &["affection", "favorability", "favor", "intimacy"];

const LOCATION_KEYS: &[&str] = &["location", "currentLocation", "place"];
const OUTFIT_KEYS: &[&str] = &["outfit", "clothes", "clothing"];
const MOOD_KEYS: &[&str] = &["mood", "emotion"];
const MONOLOGUE_KEYS: &[&str] = &["innerMonologue", "inner_monologue", "innerThoughts", "thoughts"];

const CHAR_LABEL_KEYS: &[&str] = &["relationship", "relation", "relationType", "userRelationship"];
const CHAR_PUBLIC_KEYS: &[&str] = &["charAttitude", "attitude", "publicAttitude", "charToUser"];
const CHAR_PRIVATE_KEYS: &[&str] = &["charSecret", "privateAttitude", "secretAttitude"];
const USER_LABEL_KEYS: &[&str] = &["userRelation", "userLabel"];
const USER_PUBLIC_KEYS: &[&str] = &["userAttitude", "userToChar"];
const USER_PRIVATE_KEYS: &[&str] = &["userSecret", "userPrivateAttitude"];
const USER_KNOWS_KEYS: &[&str] = &["userKnowsSecret", "userKnowsCharSecret"];
const CHAR_KNOWS_KEYS: &[&str] = &["charKnowsSecret", "charKnowsUserSecret"];
const BACKSTORY_KEYS: &[&str] = &["backstory", "relationshipBackground", "history"];

/// What the character is doing right now, used as prompt context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_monologue: Option<String>,
}

/// The relationship toward the operator embedded in an agent's profile.
///
/// This is the source of fallback relationships: it is never stored in the
/// relationship table, only reshaped into a [`Relationship`] on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRelationship {
    /// The agent's label for the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_public_attitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_private_attitude: Option<String>,
    /// Whether the operator knows the agent's private attitude
    #[serde(default)]
    pub user_knows_char_private: bool,

    /// The operator's label for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_public_attitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_private_attitude: Option<String>,
    /// Whether the agent knows the operator's private attitude
    #[serde(default)]
    pub char_knows_user_private: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,
}

impl LegacyRelationship {
    /// True when no field carries information.
    pub fn is_empty(&self) -> bool {
        self.char_label.is_none()
            && self.char_public_attitude.is_none()
            && self.char_private_attitude.is_none()
            && self.user_label.is_none()
            && self.user_public_attitude.is_none()
            && self.user_private_attitude.is_none()
            && self.backstory.is_none()
    }

    /// Reshape into the directional schema, oriented as `(agent_id, self)`.
    pub fn to_relationship(&self, agent_id: &str) -> Relationship {
        let mut rel = Relationship::new(agent_id, SELF_ID);
        rel.a_to_b = DirectionalView {
            public_label: self.char_label.clone(),
            public_attitude: self.char_public_attitude.clone(),
            private_attitude: self.char_private_attitude.clone(),
            counterpart_knows_private: self.user_knows_char_private,
        };
        rel.b_to_a = DirectionalView {
            public_label: self.user_label.clone(),
            public_attitude: self.user_public_attitude.clone(),
            private_attitude: self.user_private_attitude.clone(),
            counterpart_knows_private: self.char_knows_user_private,
        };
        rel.backstory = self.backstory.clone();
        rel.visibility = Visibility::All;
        rel.is_fallback = true;
        rel
    }

    /// Build from a relationship oriented as `(agent, self)`.
    pub fn from_relationship(rel: &Relationship) -> Self {
        Self {
            char_label: rel.a_to_b.public_label.clone(),
            char_public_attitude: rel.a_to_b.public_attitude.clone(),
            char_private_attitude: rel.a_to_b.private_attitude.clone(),
            user_knows_char_private: rel.a_to_b.counterpart_knows_private,
            user_label: rel.b_to_a.public_label.clone(),
            user_public_attitude: rel.b_to_a.public_attitude.clone(),
            user_private_attitude: rel.b_to_a.private_attitude.clone(),
            char_knows_user_private: rel.b_to_a.counterpart_knows_private,
            backstory: rel.backstory.clone(),
        }
    }
}

/// A simulated character as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,

    pub id: String,

    pub display_name: String,

    #[serde(default)]
    pub persona: String,

    #[serde(default)]
    pub status: SimulatedStatus,

    /// Relationship toward the operator, embedded the legacy way
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy: Option<LegacyRelationship>,

    /// Warmth toward the operator, 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affection: Option<f64>,
}

fn current_schema_version() -> u32 {
    PROFILE_SCHEMA_VERSION
}

impl CharacterProfile {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            id: id.to_string(),
            display_name: display_name.to_string(),
            persona: String::new(),
            status: SimulatedStatus::default(),
            legacy: None,
            affection: None,
        }
    }

    /// Translate raw profile JSON of any known version into a profile.
    ///
    /// `id` is used when the JSON does not carry its own id.
    pub fn from_json(id: &str, value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidInput(format!("profile {} is not a JSON object", id)))?;

        let version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(1);

        if version >= u64::from(PROFILE_SCHEMA_VERSION) {
            let mut profile: CharacterProfile = serde_json::from_value(value.clone())?;
            if profile.id.is_empty() {
                profile.id = id.to_string();
            }
            return Ok(profile);
        }

        Ok(Self::from_legacy(id, obj))
    }

    /// Version 1: loosely keyed, flat or nested under `settings`.
    fn from_legacy(id: &str, obj: &Map<String, Value>) -> Self {
        let settings = obj.get("settings").and_then(Value::as_object);
        let lookup = |keys: &[&str]| -> Option<String> {
            first_string(obj, keys).or_else(|| settings.and_then(|s| first_string(s, keys)))
        };

        let profile_id = first_string(obj, &["id", "charId"]).unwrap_or_else(|| id.to_string());
        let display_name = lookup(NAME_KEYS).unwrap_or_else(|| profile_id.clone());

        let status_obj = obj.get("status").and_then(Value::as_object);
        let status_lookup = |keys: &[&str]| -> Option<String> {
            status_obj.and_then(|s| first_string(s, keys)).or_else(|| lookup(keys))
        };

        let legacy = LegacyRelationship {
            char_label: lookup(CHAR_LABEL_KEYS),
            char_public_attitude: lookup(CHAR_PUBLIC_KEYS),
            char_private_attitude: lookup(CHAR_PRIVATE_KEYS),
            user_knows_char_private: first_bool(obj, USER_KNOWS_KEYS)
                .or_else(|| settings.and_then(|s| first_bool(s, USER_KNOWS_KEYS)))
                .unwrap_or(false),
            user_label: lookup(USER_LABEL_KEYS),
            user_public_attitude: lookup(USER_PUBLIC_KEYS),
            user_private_attitude: lookup(USER_PRIVATE_KEYS),
            char_knows_user_private: first_bool(obj, CHAR_KNOWS_KEYS)
                .or_else(|| settings.and_then(|s| first_bool(s, CHAR_KNOWS_KEYS)))
                .unwrap_or(false),
            backstory: lookup(BACKSTORY_KEYS),
        };

        let affection = first_number(obj, AFFECTION_KEYS)
            .or_else(|| settings.and_then(|s| first_number(s, AFFECTION_KEYS)));

        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            id: profile_id,
            display_name,
            persona: lookup(PERSONA_KEYS).unwrap_or_default(),
            status: SimulatedStatus {
                location: status_lookup(LOCATION_KEYS),
                outfit: status_lookup(OUTFIT_KEYS),
                mood: status_lookup(MOOD_KEYS),
                inner_monologue: status_lookup(MONOLOGUE_KEYS),
            },
            legacy: if legacy.is_empty() { None } else { Some(legacy) },
            affection,
        }
    }

    /// Serialize in the canonical shape.
    pub fn to_json(&self) -> Result<Value> {
        let mut canonical = self.clone();
        canonical.schema_version = PROFILE_SCHEMA_VERSION;
        Ok(serde_json::to_value(canonical)?)
    }

    /// The fallback relationship toward the operator, if the profile has one.
    pub fn fallback_relationship(&self) -> Option<Relationship> {
        self.legacy
            .as_ref()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_relationship(&self.id))
    }

    /// Affection toward the operator clamped to 0-100.
    pub fn affection_clamped(&self) -> f64 {
        self.affection.unwrap_or(0.0).clamp(0.0, 100.0)
    }
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_bool(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(Value::as_bool)
}

fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
