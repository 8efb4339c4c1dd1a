//! Relationship-aware reaction probabilities.
//!
//! Whether an agent reacts to a post is a Bernoulli trial. The probability is
//! derived from how the reactor itself describes its relationship to the
//! poster (never from the poster's view of the reactor), the reactor's
//! affection toward the operator, and a couple of persona keywords.
//!
//! Classification is a heuristic keyword table matched in order; the first
//! rule that matches wins.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dice::Dice;
use crate::models::is_self;
use crate::profiles::ProfileSource;
use crate::relationships::RelationshipStore;
use crate::Result;

/// Upper bound on any single reaction probability.
pub const MAX_PROBABILITY: f64 = 0.8;

/// Round cap applied to reserved or high-status personas.
pub const RESERVED_ROUND_CAP: usize = 2;

/// Coarse type of a relationship, from one side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Lover,
    Crush,
    CloseFriend,
    Enemy,
    Cold,
    Normal,
}

impl Classification {
    /// Classify free relationship text. The first matching rule wins.
    pub fn from_text(text: &str) -> Self {
        CLASSIFICATION_RULES
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(class, _)| *class)
            .unwrap_or(Classification::Normal)
    }

    /// Base reaction probability before affection and persona scaling.
    pub fn base_probability(self, poster_is_self: bool) -> f64 {
        use Classification::*;
        if poster_is_self {
            match self {
                Lover => 0.6,
                Crush => 0.5,
                CloseFriend => 0.25,
                Enemy => 0.15,
                Cold => 0.03,
                Normal => 0.05,
            }
        } else {
            match self {
                Lover => 0.45,
                Crush => 0.35,
                CloseFriend => 0.18,
                Enemy => 0.1,
                Cold => 0.02,
                Normal => 0.03,
            }
        }
    }

    /// How many comment rounds an agent of this classification may take part in.
    pub fn round_cap(self) -> usize {
        match self {
            Classification::Lover | Classification::CloseFriend => 6,
            Classification::Enemy => 3,
            _ => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Lover => "lover",
            Classification::Crush => "crush",
            Classification::CloseFriend => "close_friend",
            Classification::Enemy => "enemy",
            Classification::Cold => "cold",
            Classification::Normal => "normal",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static CLASSIFICATION_RULES: LazyLock<Vec<(Classification, Regex)>> = LazyLock::new(|| {
    [
        (
            Classification::Lover,
            r"(?i)\b(lovers?|boyfriend|girlfriend|husband|wife|spouse|fianc[eé]e?|married|dating|sweetheart|soulmate)\b|恋人|男友|女友|夫妻|老公|老婆",
        ),
        (
            Classification::Crush,
            r"(?i)\b(crush(ing)?|in love|infatuat\w*|smitten|secretly likes?|has feelings)\b|暗恋|喜欢",
        ),
        (
            Classification::CloseFriend,
            r"(?i)\b(close friends?|best friends?|bff|childhood friends?|confidante?s?|sworn (brothers?|sisters?))\b|挚友|闺蜜|好友|青梅竹马",
        ),
        (
            Classification::Enemy,
            r"(?i)\b(enem(y|ies)|rivals?|nemesis|hates?|hatred|despises?|grudge|foes?)\b|敌人|仇|宿敌|讨厌",
        ),
        (
            Classification::Cold,
            r"(?i)\b(cold|distant|indifferent|ignores?|estranged|wary|dislikes?|strangers?)\b|冷淡|疏远|陌生",
        ),
    ]
    .into_iter()
    .map(|(class, pattern)| (class, Regex::new(pattern).expect("Invalid regex")))
    .collect()
});

static RESERVED_PERSONA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(reserved|introvert(ed)?|shy|quiet|aloof|cold|taciturn|stoic|withdrawn)\b|内向|高冷|沉默")
        .expect("Invalid regex")
});

static HIGH_STATUS_PERSONA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(high[- ]status|noble|aristocrat\w*|royal(ty)?|prince(ss)?|ceo|tycoon|arrogant|proud)\b|总裁|贵族|高贵")
        .expect("Invalid regex")
});

static OUTGOING_PERSONA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(outgoing|extrovert(ed)?|gossip\w*|chatty|talkative|social butterfly|bubbly|lively)\b|外向|八卦|话痨|活泼")
        .expect("Invalid regex")
});

/// Persona keywords relevant to reaction behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersonaTraits {
    pub reserved: bool,
    pub high_status: bool,
    pub outgoing: bool,
}

impl PersonaTraits {
    pub fn from_persona(persona: &str) -> Self {
        Self {
            reserved: RESERVED_PERSONA.is_match(persona),
            high_status: HIGH_STATUS_PERSONA.is_match(persona),
            outgoing: OUTGOING_PERSONA.is_match(persona),
        }
    }

    /// Multiplier applied to every reaction probability.
    pub fn multiplier(&self) -> f64 {
        let mut m = 1.0;
        if self.reserved {
            m *= 0.5;
        }
        if self.outgoing {
            m *= 1.5;
        }
        m
    }

    /// Whether the persona caps participation in comment threads.
    pub fn limits_rounds(&self) -> bool {
        self.reserved || self.high_status
    }
}

/// Computes reaction probabilities and round caps for agents.
pub struct ReactionEngine {
    relationships: Arc<RelationshipStore>,
    profiles: Arc<dyn ProfileSource>,
    dice: Arc<Dice>,
}

impl ReactionEngine {
    pub fn new(
        relationships: Arc<RelationshipStore>,
        profiles: Arc<dyn ProfileSource>,
        dice: Arc<Dice>,
    ) -> Self {
        Self {
            relationships,
            profiles,
            dice,
        }
    }

    /// Classify how `reactor` regards `target`, from `reactor`'s view only.
    pub fn classify(&self, reactor: &str, target: &str) -> Result<Classification> {
        if reactor == target {
            return Ok(Classification::Normal);
        }
        let class = match self.relationships.get(reactor, target)? {
            // `get` orients the record from `reactor`, so `a_to_b` is its own view.
            Some(rel) => Classification::from_text(&rel.a_to_b.text()),
            None => Classification::Normal,
        };
        Ok(class)
    }

    fn persona_traits(&self, agent: &str) -> Result<PersonaTraits> {
        Ok(self
            .profiles
            .profile(agent)?
            .map(|p| PersonaTraits::from_persona(&p.persona))
            .unwrap_or_default())
    }

    /// Probability that `reactor` interacts with a post by `poster`.
    pub fn interaction_probability(&self, reactor: &str, poster: &str) -> Result<f64> {
        if reactor == poster {
            return Ok(0.0);
        }
        let class = self.classify(reactor, poster)?;
        let poster_is_self = is_self(poster);
        let mut p = class.base_probability(poster_is_self);

        let profile = self.profiles.profile(reactor)?;
        if poster_is_self {
            let affection = profile.as_ref().map(|p| p.affection_clamped()).unwrap_or(0.0);
            p *= 1.0 + affection / 200.0;
        }
        let traits = profile
            .as_ref()
            .map(|p| PersonaTraits::from_persona(&p.persona))
            .unwrap_or_default();
        p *= traits.multiplier();

        let p = p.clamp(0.0, MAX_PROBABILITY);
        debug!(reactor, poster, classification = %class, probability = p, "Reaction probability");
        Ok(p)
    }

    /// Roll the Bernoulli trial for `reactor` reacting to `poster`.
    pub fn should_interact(&self, reactor: &str, poster: &str) -> Result<bool> {
        let p = self.interaction_probability(reactor, poster)?;
        Ok(self.dice.chance(p))
    }

    /// Maximum number of comment rounds `agent` joins on a thread started by `poster`.
    pub fn round_cap(&self, agent: &str, poster: &str) -> Result<usize> {
        let cap = self.classify(agent, poster)?.round_cap();
        if self.persona_traits(agent)?.limits_rounds() {
            Ok(cap.min(RESERVED_ROUND_CAP))
        } else {
            Ok(cap)
        }
    }

    pub fn dice(&self) -> &Arc<Dice> {
        &self.dice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Relationship, SELF_ID};
    use crate::test_utils::TestEnv;
    use serde_json::json;

    fn scenario_env() -> TestEnv {
        let env = TestEnv::new();
        env.profiles
            .put_raw(
                "char_a",
                json!({
                    "id": "char_a",
                    "name": "Ava",
                    "persona": "outgoing",
                    "relationship": "close friend",
                    "affection": 50
                }),
            )
            .unwrap();
        env.profiles
            .put_raw(
                "char_b",
                json!({
                    "id": "char_b",
                    "name": "Bram",
                    "persona": "reserved, high-status",
                    "relationship": "acquaintance"
                }),
            )
            .unwrap();
        env
    }

    fn observed_rate(engine: &ReactionEngine, reactor: &str, poster: &str, trials: usize) -> f64 {
        let hits = (0..trials)
            .filter(|_| engine.should_interact(reactor, poster).unwrap())
            .count();
        hits as f64 / trials as f64
    }

    #[test]
    fn test_classification_rules_in_order() {
        assert_eq!(Classification::from_text("her husband"), Classification::Lover);
        assert_eq!(Classification::from_text("has a crush on him"), Classification::Crush);
        assert_eq!(Classification::from_text("Best friend since school"), Classification::CloseFriend);
        assert_eq!(Classification::from_text("bitter rival"), Classification::Enemy);
        assert_eq!(Classification::from_text("distant coworker"), Classification::Cold);
        assert_eq!(Classification::from_text("neighbor"), Classification::Normal);
        assert_eq!(Classification::from_text(""), Classification::Normal);
        // Lover is checked before enemy.
        assert_eq!(Classification::from_text("wife, but hates mornings"), Classification::Lover);
        // Word boundaries: "scolded" is not "cold".
        assert_eq!(Classification::from_text("scolded once"), Classification::Normal);
    }

    #[test]
    fn test_classification_uses_reactor_view_only() {
        let env = TestEnv::new();
        env.add_agent("a", "A", "");
        env.add_agent("b", "B", "");
        let mut rel = Relationship::new("a", "b");
        rel.a_to_b.public_label = Some("coworker".to_string());
        rel.b_to_a.public_label = Some("secret lover".to_string());
        env.relationships.save(rel).unwrap();

        let engine = env.reaction_engine();
        assert_eq!(engine.classify("a", "b").unwrap(), Classification::Normal);
        assert_eq!(engine.classify("b", "a").unwrap(), Classification::Lover);
    }

    #[test]
    fn test_agent_tables_lower_than_self_tables() {
        use Classification::*;
        for class in [Lover, Crush, CloseFriend, Enemy, Cold, Normal] {
            assert!(class.base_probability(false) < class.base_probability(true));
        }
    }

    #[test]
    fn test_scenario_probabilities() {
        let env = scenario_env();
        let engine = env.reaction_engine();
        let a = engine.interaction_probability("char_a", SELF_ID).unwrap();
        let b = engine.interaction_probability("char_b", SELF_ID).unwrap();
        assert!((a - 0.25 * 1.5 * 1.25).abs() < 1e-9, "a = {}", a);
        assert!((b - 0.05 * 0.5).abs() < 1e-9, "b = {}", b);
    }

    #[test]
    fn test_scenario_sampled_rates() {
        let env = scenario_env();
        let engine = env.reaction_engine();
        let trials = 20_000;

        let a = observed_rate(&engine, "char_a", SELF_ID, trials);
        assert!((a - 0.469).abs() < 0.02, "observed A rate {}", a);

        let b = observed_rate(&engine, "char_b", SELF_ID, trials);
        assert!((b - 0.025).abs() < 0.006, "observed B rate {}", b);
    }

    #[test]
    fn test_affection_only_scales_posts_by_self() {
        let env = scenario_env();
        env.add_agent("char_c", "Cai", "");
        let mut rel = Relationship::new("char_a", "char_c");
        rel.a_to_b.public_label = Some("close friend".to_string());
        env.relationships.save(rel).unwrap();

        let engine = env.reaction_engine();
        let p = engine.interaction_probability("char_a", "char_c").unwrap();
        assert!((p - 0.18 * 1.5).abs() < 1e-9, "p = {}", p);
    }

    #[test]
    fn test_probability_is_clamped() {
        let env = TestEnv::new();
        env.profiles
            .put_raw(
                "c",
                json!({
                    "id": "c",
                    "name": "C",
                    "persona": "bubbly gossip",
                    "relationship": "girlfriend",
                    "affection": 100
                }),
            )
            .unwrap();
        let engine = env.reaction_engine();
        let p = engine.interaction_probability("c", SELF_ID).unwrap();
        assert_eq!(p, MAX_PROBABILITY);
    }

    #[test]
    fn test_no_reaction_to_own_post() {
        let env = scenario_env();
        let engine = env.reaction_engine();
        assert_eq!(engine.interaction_probability("char_a", "char_a").unwrap(), 0.0);
        assert!(!engine.should_interact("char_a", "char_a").unwrap());
    }

    #[test]
    fn test_round_caps() {
        let env = scenario_env();
        let engine = env.reaction_engine();
        assert_eq!(engine.round_cap("char_a", SELF_ID).unwrap(), 6);
        assert_eq!(engine.round_cap("char_b", SELF_ID).unwrap(), 1);

        env.profiles
            .put_raw(
                "char_d",
                json!({
                    "id": "char_d",
                    "name": "Dara",
                    "persona": "proud aristocrat",
                    "relationship": "wife"
                }),
            )
            .unwrap();
        assert_eq!(engine.round_cap("char_d", SELF_ID).unwrap(), RESERVED_ROUND_CAP);

        env.add_agent_with_legacy("char_e", "Eli", "sworn enemy", "");
        assert_eq!(engine.round_cap("char_e", SELF_ID).unwrap(), 3);
    }

    #[test]
    fn test_persona_traits() {
        let t = PersonaTraits::from_persona("Reserved, high-status heir");
        assert!(t.reserved && t.high_status && !t.outgoing);
        assert_eq!(t.multiplier(), 0.5);
        assert!(t.limits_rounds());

        let t = PersonaTraits::from_persona("a chatty barista");
        assert!(t.outgoing);
        assert_eq!(t.multiplier(), 1.5);
        assert!(!t.limits_rounds());
    }
}
