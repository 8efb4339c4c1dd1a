//! Profile, relationship, and rumor commands.

use std::collections::BTreeSet;
use std::io::Read;

use serde::Serialize;
use serde_json::Value;

use super::{Context, Output, Removed, json};
use crate::models::profile::CharacterProfile;
use crate::models::{DirectionalPatch, DirectionalView, Relationship, Rumor, RumorBelief, Visibility};
use crate::profiles::ProfileSource;
use crate::relationships::{DeleteOutcome, EdgeSource, SubjectiveEdge};
use crate::{Error, Result};

fn describe_view(view: &DirectionalView) -> String {
    let mut parts = Vec::new();
    if let Some(ref label) = view.public_label {
        parts.push(label.clone());
    }
    if let Some(ref attitude) = view.public_attitude {
        parts.push(format!("openly {}", attitude));
    }
    if let Some(ref private) = view.private_attitude {
        let known = if view.counterpart_knows_private { ", known" } else { "" };
        parts.push(format!("privately {}{}", private, known));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join("; ")
    }
}

fn describe_visibility(visibility: &Visibility) -> String {
    match visibility {
        Visibility::All => "everyone".to_string(),
        Visibility::Observers(ids) if ids.is_empty() => "nobody".to_string(),
        Visibility::Observers(ids) => ids.iter().cloned().collect::<Vec<_>>().join(", "),
    }
}

fn describe_relationship(rel: &Relationship) -> String {
    let mut out = format!(
        "{} -> {}: {}\n{} -> {}: {}",
        rel.node_a,
        rel.node_b,
        describe_view(&rel.a_to_b),
        rel.node_b,
        rel.node_a,
        describe_view(&rel.b_to_a)
    );
    if let Some(ref backstory) = rel.backstory {
        out.push_str(&format!("\n  Backstory: {}", backstory));
    }
    out.push_str(&format!("\n  Visible to: {}", describe_visibility(&rel.visibility)));
    if rel.is_fallback {
        out.push_str("\n  (from profile)");
    }
    out
}

// === Profiles ===

#[derive(Serialize)]
pub struct ProfilesImported {
    pub imported: Vec<String>,
}

impl Output for ProfilesImported {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Imported {} profile(s): {}", self.imported.len(), self.imported.join(", "))
    }
}

/// Import profiles from a JSON file (or stdin with "-").
///
/// Accepts a single profile object or an array of them.
pub fn profile_import(ctx: &Context, input: &str) -> Result<ProfilesImported> {
    let content = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(input)?
    };
    let values = match serde_json::from_str::<Value>(&content)? {
        Value::Array(values) => values,
        single @ Value::Object(_) => vec![single],
        _ => {
            return Err(Error::InvalidInput(
                "expected a profile object or an array of profiles".to_string(),
            ));
        }
    };
    Ok(ProfilesImported {
        imported: ctx.engine.profiles.import(&values)?,
    })
}

#[derive(Serialize)]
pub struct ProfileList {
    pub count: usize,
    pub profiles: Vec<CharacterProfile>,
}

impl Output for ProfileList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.profiles.is_empty() {
            return "No profiles.".to_string();
        }
        let mut lines = vec![format!("{} profile(s):", self.count)];
        for p in &self.profiles {
            let persona: String = p.persona.chars().take(60).collect();
            lines.push(format!("  {}  {}  {}", p.id, p.display_name, persona));
        }
        lines.join("\n")
    }
}

pub fn profile_list(ctx: &Context) -> Result<ProfileList> {
    let profiles = ctx.engine.profiles.all()?;
    Ok(ProfileList {
        count: profiles.len(),
        profiles,
    })
}

impl Output for CharacterProfile {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} ({})", self.display_name, self.id)];
        if !self.persona.is_empty() {
            lines.push(format!("  Persona:   {}", self.persona));
        }
        if let Some(ref mood) = self.status.mood {
            lines.push(format!("  Mood:      {}", mood));
        }
        if let Some(ref location) = self.status.location {
            lines.push(format!("  Location:  {}", location));
        }
        if let Some(affection) = self.affection {
            lines.push(format!("  Affection: {}", affection));
        }
        if let Some(rel) = self.fallback_relationship() {
            lines.push(format!("  Toward me: {}", describe_view(&rel.a_to_b)));
        }
        lines.join("\n")
    }
}

pub fn profile_show(ctx: &Context, id: &str) -> Result<CharacterProfile> {
    ctx.engine
        .profiles
        .profile(id)?
        .ok_or_else(|| Error::NotFound(format!("agent {}", id)))
}

pub fn profile_remove(ctx: &Context, id: &str) -> Result<Removed> {
    Ok(Removed {
        kind: "profile",
        id: id.to_string(),
        removed: ctx.engine.profiles.remove(id)?,
    })
}

// === Relationships ===

#[derive(Serialize)]
pub struct RelationshipResult {
    pub a: String,
    pub b: String,
    pub relationship: Option<Relationship>,
}

impl Output for RelationshipResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.relationship {
            Some(ref rel) => describe_relationship(rel),
            None => format!("No relationship between {} and {}", self.a, self.b),
        }
    }
}

pub fn rel_show(ctx: &Context, a: &str, b: &str) -> Result<RelationshipResult> {
    Ok(RelationshipResult {
        a: a.to_string(),
        b: b.to_string(),
        relationship: ctx.engine.relationships.get(a, b)?,
    })
}

/// Field changes for `rel save`; `None` leaves a field as it is.
#[derive(Debug, Default)]
pub struct RelationshipEdit {
    pub forward: DirectionalPatch,
    pub reverse: DirectionalPatch,
    pub backstory: Option<String>,
    pub visibility: Option<Visibility>,
}

impl RelationshipEdit {
    /// Visibility from CLI flags: `--hidden`, a list of observers, or unchanged.
    pub fn visibility_from(hidden: bool, observers: Vec<String>) -> Option<Visibility> {
        if hidden {
            Some(Visibility::hidden())
        } else if observers.is_empty() {
            None
        } else {
            Some(Visibility::Observers(observers.into_iter().collect::<BTreeSet<_>>()))
        }
    }
}

/// Create or update a relationship, keeping fields the edit does not touch.
pub fn rel_save(ctx: &Context, a: &str, b: &str, edit: RelationshipEdit) -> Result<RelationshipResult> {
    ctx.require_node(a)?;
    ctx.require_node(b)?;
    let mut rel = ctx
        .engine
        .relationships
        .get(a, b)?
        .unwrap_or_else(|| Relationship::new(a, b));
    rel.a_to_b.apply(&edit.forward);
    rel.b_to_a.apply(&edit.reverse);
    if let Some(backstory) = edit.backstory {
        rel.backstory = (!backstory.is_empty()).then_some(backstory);
    }
    if let Some(visibility) = edit.visibility {
        rel.visibility = visibility;
    }
    let saved = ctx.engine.relationships.save(rel)?;
    Ok(RelationshipResult {
        a: a.to_string(),
        b: b.to_string(),
        relationship: Some(saved),
    })
}

#[derive(Serialize)]
pub struct RelationshipDeleted {
    pub a: String,
    pub b: String,
    pub outcome: DeleteOutcome,
}

impl Output for RelationshipDeleted {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.outcome {
            DeleteOutcome::Tombstoned => {
                format!("Deleted {} <-> {} (profile relationship suppressed)", self.a, self.b)
            }
            DeleteOutcome::Removed => format!("Deleted {} <-> {}", self.a, self.b),
            DeleteOutcome::NotFound => format!("No relationship between {} and {}", self.a, self.b),
        }
    }
}

pub fn rel_delete(ctx: &Context, a: &str, b: &str) -> Result<RelationshipDeleted> {
    Ok(RelationshipDeleted {
        a: a.to_string(),
        b: b.to_string(),
        outcome: ctx.engine.relationships.delete(a, b)?,
    })
}

#[derive(Serialize)]
pub struct EdgeList {
    pub count: usize,
    pub edges: Vec<Relationship>,
}

impl Output for EdgeList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.edges.is_empty() {
            return "No relationships.".to_string();
        }
        let mut out = format!("{} relationship(s):", self.count);
        for rel in &self.edges {
            out.push_str("\n\n");
            out.push_str(&describe_relationship(rel));
        }
        out
    }
}

pub fn rel_list(ctx: &Context) -> Result<EdgeList> {
    let edges = ctx.engine.relationships.list_edges()?;
    Ok(EdgeList {
        count: edges.len(),
        edges,
    })
}

pub fn rel_sync_to_profile(ctx: &Context, a: &str, b: &str) -> Result<RelationshipResult> {
    ctx.engine.relationships.sync_to_profile(a, b)?;
    rel_show(ctx, a, b)
}

pub fn rel_sync_from_profile(ctx: &Context, a: &str, b: &str) -> Result<RelationshipResult> {
    let rel = ctx.engine.relationships.sync_from_profile(a, b)?;
    Ok(RelationshipResult {
        a: a.to_string(),
        b: b.to_string(),
        relationship: Some(rel),
    })
}

// === Rumors ===

impl Output for Rumor {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{} believes, about {} and {}:",
            self.observer_id, self.node_a, self.node_b
        )];
        if let Some(ref belief) = self.a_to_b {
            lines.push(format!("  {} -> {}: {}", self.node_a, self.node_b, belief));
        }
        if let Some(ref belief) = self.b_to_a {
            lines.push(format!("  {} -> {}: {}", self.node_b, self.node_a, belief));
        }
        lines.join("\n")
    }
}

pub fn rumor_add(
    ctx: &Context,
    observer: &str,
    a: &str,
    b: &str,
    belief: Option<String>,
    reverse_belief: Option<String>,
) -> Result<Rumor> {
    if belief.is_none() && reverse_belief.is_none() {
        return Err(Error::InvalidInput(
            "give --belief and/or --reverse-belief".to_string(),
        ));
    }
    ctx.require_node(observer)?;
    ctx.engine.rumors.save_rumor(
        observer,
        a,
        b,
        RumorBelief {
            a_to_b: belief,
            b_to_a: reverse_belief,
        },
    )
}

pub fn rumor_show(ctx: &Context, observer: &str, a: &str, b: &str) -> Result<Rumor> {
    ctx.engine
        .rumors
        .get_rumor(observer, a, b)?
        .ok_or_else(|| Error::NotFound(format!("rumor of {} about {} and {}", observer, a, b)))
}

pub fn rumor_delete(ctx: &Context, observer: &str, a: &str, b: &str) -> Result<Removed> {
    Ok(Removed {
        kind: "rumor",
        id: format!("{}:{}~{}", observer, a, b),
        removed: ctx.engine.rumors.delete_rumor(observer, a, b)?,
    })
}

#[derive(Serialize)]
pub struct RumorList {
    pub observer: String,
    pub rumors: Vec<Rumor>,
}

impl Output for RumorList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.rumors.is_empty() {
            return format!("{} holds no rumors.", self.observer);
        }
        self.rumors
            .iter()
            .map(Output::to_human)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn rumor_list(ctx: &Context, observer: &str) -> Result<RumorList> {
    Ok(RumorList {
        observer: observer.to_string(),
        rumors: ctx.engine.rumors.rumors_of(observer)?,
    })
}

#[derive(Serialize)]
pub struct SubjectiveGraph {
    pub observer: String,
    pub edges: Vec<SubjectiveEdge>,
}

impl Output for SubjectiveGraph {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.edges.is_empty() {
            return format!("{} sees no relationships.", self.observer);
        }
        let mut out = format!("The graph as {} sees it:", self.observer);
        for edge in &self.edges {
            let tag = match edge.source {
                EdgeSource::Truth => "known",
                EdgeSource::Rumor => "rumor",
            };
            let rel = &edge.relationship;
            out.push_str(&format!(
                "\n  [{}] {} -> {}: {} | {} -> {}: {}",
                tag,
                rel.node_a,
                rel.node_b,
                describe_view(&rel.a_to_b),
                rel.node_b,
                rel.node_a,
                describe_view(&rel.b_to_a)
            ));
        }
        out
    }
}

pub fn rumor_graph(ctx: &Context, observer: &str) -> Result<SubjectiveGraph> {
    Ok(SubjectiveGraph {
        observer: observer.to_string(),
        edges: ctx.engine.rumors.subjective_graph(observer)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::storage::BackendType;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx() -> Context {
        let dir = TempDir::new().unwrap();
        Context::open(Some(dir.path()), BackendType::Memory, &ConfigOverrides::new()).unwrap()
    }

    fn add(ctx: &Context, id: &str, name: &str) {
        ctx.engine
            .profiles
            .put_raw(id, json!({ "id": id, "name": name }))
            .unwrap();
    }

    #[test]
    fn test_profile_import_from_file() {
        let ctx = ctx();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("profiles.json");
        std::fs::write(
            &file,
            r#"[{"id": "a", "name": "Ana", "persona": "quiet"}, {"charId": "b", "nickname": "Ben"}]"#,
        )
        .unwrap();

        let imported = profile_import(&ctx, file.to_str().unwrap()).unwrap();
        assert_eq!(imported.imported, vec!["a".to_string(), "b".to_string()]);
        let list = profile_list(&ctx).unwrap();
        assert_eq!(list.count, 2);
        assert!(list.to_human().contains("Ana"));
    }

    #[test]
    fn test_profile_import_rejects_scalars() {
        let ctx = ctx();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("bad.json");
        std::fs::write(&file, "42").unwrap();
        assert!(matches!(
            profile_import(&ctx, file.to_str().unwrap()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rel_save_keeps_untouched_fields() {
        let ctx = ctx();
        add(&ctx, "a", "Ana");
        add(&ctx, "b", "Ben");

        let first = RelationshipEdit {
            forward: DirectionalPatch {
                public_label: Some("rival".to_string()),
                private_attitude: Some("jealous".to_string()),
                ..Default::default()
            },
            backstory: Some("same class".to_string()),
            ..Default::default()
        };
        rel_save(&ctx, "a", "b", first).unwrap();

        // Edited from the other side: only b's view of a changes.
        let second = RelationshipEdit {
            forward: DirectionalPatch {
                public_attitude: Some("polite".to_string()),
                ..Default::default()
            },
            visibility: RelationshipEdit::visibility_from(false, vec!["c".to_string()]),
            ..Default::default()
        };
        rel_save(&ctx, "b", "a", second).unwrap();

        let rel = rel_show(&ctx, "a", "b").unwrap().relationship.unwrap();
        assert_eq!(rel.a_to_b.public_label.as_deref(), Some("rival"));
        assert_eq!(rel.a_to_b.private_attitude.as_deref(), Some("jealous"));
        assert_eq!(rel.b_to_a.public_attitude.as_deref(), Some("polite"));
        assert_eq!(rel.backstory.as_deref(), Some("same class"));
        assert!(rel.visibility.includes("c"));
        assert!(!rel.visibility.includes("d"));
    }

    #[test]
    fn test_rel_save_requires_known_nodes() {
        let ctx = ctx();
        add(&ctx, "a", "Ana");
        let err = rel_save(&ctx, "a", "nobody", RelationshipEdit::default());
        assert!(matches!(err, Err(Error::NotFound(_))));
        assert!(rel_save(&ctx, "a", "self", RelationshipEdit::default()).is_ok());
    }

    #[test]
    fn test_rel_delete_and_list() {
        let ctx = ctx();
        add(&ctx, "a", "Ana");
        add(&ctx, "b", "Ben");
        rel_save(&ctx, "a", "b", RelationshipEdit::default()).unwrap();
        assert_eq!(rel_list(&ctx).unwrap().count, 1);

        let deleted = rel_delete(&ctx, "a", "b").unwrap();
        assert_eq!(deleted.outcome, DeleteOutcome::Removed);
        assert_eq!(rel_list(&ctx).unwrap().count, 0);
        assert!(rel_show(&ctx, "a", "b").unwrap().to_human().starts_with("No relationship"));
    }

    #[test]
    fn test_hidden_visibility_from_flags() {
        assert!(RelationshipEdit::visibility_from(false, vec![]).is_none());
        let hidden = RelationshipEdit::visibility_from(true, vec![]).unwrap();
        assert!(hidden.is_hidden());
    }

    #[test]
    fn test_rumor_commands() {
        let ctx = ctx();
        add(&ctx, "a", "Ana");
        add(&ctx, "b", "Ben");
        add(&ctx, "c", "Cal");

        assert!(rumor_add(&ctx, "c", "a", "b", None, None).is_err());
        let rumor = rumor_add(&ctx, "c", "b", "a", Some("secretly adores".to_string()), None).unwrap();
        assert!(rumor.to_human().contains("secretly adores"));

        let list = rumor_list(&ctx, "c").unwrap();
        assert_eq!(list.rumors.len(), 1);
        let graph = rumor_graph(&ctx, "c").unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].source, EdgeSource::Rumor);

        let from_b = rumor_show(&ctx, "c", "b", "a").unwrap();
        assert_eq!(from_b.a_to_b.as_deref(), Some("secretly adores"));
        let from_a = rumor_show(&ctx, "c", "a", "b").unwrap();
        assert_eq!(from_a.b_to_a.as_deref(), Some("secretly adores"));

        assert!(rumor_delete(&ctx, "c", "a", "b").unwrap().removed);
        assert!(rumor_list(&ctx, "c").unwrap().rumors.is_empty());
        assert!(matches!(rumor_show(&ctx, "c", "a", "b"), Err(Error::NotFound(_))));
    }
}
