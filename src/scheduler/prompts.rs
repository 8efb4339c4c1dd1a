//! Prompt builders for generated posts, comments, and relationship analysis.

use chrono::{DateTime, Utc};

use crate::llm::ChatMessage;
use crate::models::Relationship;
use crate::models::profile::CharacterProfile;

/// One rendered comment of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadLine {
    pub author: String,
    pub reply_to: Option<String>,
    pub text: String,
}

impl ThreadLine {
    pub fn render(&self) -> String {
        match self.reply_to {
            Some(ref to) => format!("{} replying to {}: {}", self.author, to, self.text),
            None => format!("{}: {}", self.author, self.text),
        }
    }
}

/// Everything needed to ask for a new post.
pub struct MomentContext<'a> {
    pub profile: &'a CharacterProfile,
    /// Rendered relationship lines from this agent's point of view
    pub relationships: Vec<String>,
    /// The agent's own recent posts, to avoid repeats
    pub recent_posts: Vec<String>,
    pub style_hint: Option<&'a str>,
    /// Set for compensation posts: the past moment to write from
    pub backdate: Option<DateTime<Utc>>,
}

/// Everything needed to ask for a comment.
pub struct CommentContext<'a> {
    pub profile: &'a CharacterProfile,
    pub post_author: &'a str,
    pub post_text: &'a str,
    /// How this agent regards the post author, if they are related
    pub relation_to_author: Option<String>,
    /// The part of the thread this agent can see
    pub thread: Vec<ThreadLine>,
    /// The comment being answered; `None` for a top-level comment
    pub target: Option<ThreadLine>,
}

fn character_block(profile: &CharacterProfile) -> String {
    let mut out = format!("You are {}.", profile.display_name);
    if !profile.persona.trim().is_empty() {
        out.push_str(&format!("\nPersona: {}", profile.persona.trim()));
    }
    let status = &profile.status;
    let facts = [
        ("Current location", status.location.as_deref()),
        ("Wearing", status.outfit.as_deref()),
        ("Mood", status.mood.as_deref()),
        ("Thinking", status.inner_monologue.as_deref()),
    ];
    for (label, value) in facts {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            out.push_str(&format!("\n{}: {}", label, v.trim()));
        }
    }
    out
}

/// Describe a relationship oriented from the agent (`a_to_b` is its view).
pub fn relationship_line(other_name: &str, rel: &Relationship) -> String {
    let view = &rel.a_to_b;
    let mut parts = Vec::new();
    if let Some(ref label) = view.public_label {
        parts.push(label.clone());
    }
    if let Some(ref attitude) = view.public_attitude {
        parts.push(format!("openly {}", attitude));
    }
    if let Some(ref private) = view.private_attitude {
        parts.push(format!("privately {}", private));
    }
    if parts.is_empty() {
        format!("{}: acquainted", other_name)
    } else {
        format!("{}: {}", other_name, parts.join("; "))
    }
}

pub fn moment_messages(ctx: &MomentContext<'_>) -> Vec<ChatMessage> {
    let mut system = character_block(ctx.profile);
    system.push_str(
        "\n\nYou share short posts on a private social feed read by people you know. \
         Write in your own voice, in first person, like a real post: no hashtag \
         spam, no narration about being a character.",
    );
    if !ctx.relationships.is_empty() {
        system.push_str("\n\nPeople in your life:\n");
        system.push_str(&ctx.relationships.join("\n"));
    }

    let mut user = String::from("Write one new post.");
    if let Some(at) = ctx.backdate {
        user.push_str(&format!(
            " It is {}. Write as if living in that moment; do not mention that time has passed since.",
            at.format("%A %Y-%m-%d %H:%M UTC")
        ));
    }
    if let Some(hint) = ctx.style_hint.filter(|h| !h.trim().is_empty()) {
        user.push_str(&format!("\nStyle: {}", hint.trim()));
    }
    if !ctx.recent_posts.is_empty() {
        user.push_str("\nDo not repeat these recent posts of yours:\n");
        for text in &ctx.recent_posts {
            user.push_str(&format!("- {}\n", text));
        }
    }
    user.push_str(
        "\nReply with only a JSON object: \
         {\"content\": \"post text\", \"images\": [\"short image description\"], \"location\": \"place or empty\"}",
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn comment_messages(ctx: &CommentContext<'_>) -> Vec<ChatMessage> {
    let mut system = character_block(ctx.profile);
    if let Some(ref relation) = ctx.relation_to_author {
        system.push_str(&format!("\nRelationship: {}", relation));
    }
    system.push_str("\n\nYou are commenting on a social feed post. Keep it to one or two casual sentences.");

    let mut user = format!("{} posted: {}\n", ctx.post_author, ctx.post_text);
    if !ctx.thread.is_empty() {
        user.push_str("\nComments so far:\n");
        for line in &ctx.thread {
            user.push_str(&line.render());
            user.push('\n');
        }
    }
    match ctx.target {
        Some(ref target) => user.push_str(&format!(
            "\nWrite your reply to {}'s comment \"{}\".",
            target.author, target.text
        )),
        None => user.push_str("\nWrite your comment on the post."),
    }
    user.push_str(" Reply with the comment text only.");

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn analysis_messages(
    a_name: &str,
    b_name: &str,
    post_text: &str,
    exchange: &[ThreadLine],
) -> Vec<ChatMessage> {
    let system = "You read social feed conversations and describe, neutrally, how the people \
                  involved now feel about each other."
        .to_string();

    let mut user = format!(
        "Under a post reading \"{}\", {} and {} exchanged these comments:\n",
        post_text, a_name, b_name
    );
    for line in exchange {
        user.push_str(&line.render());
        user.push('\n');
    }
    user.push_str(&format!(
        "\nReply with only a JSON object: {{\"summary\": \"one neutral sentence\", \
         \"a_to_b\": \"how {a} privately feels about {b} now\", \
         \"b_to_a\": \"how {b} privately feels about {a} now\"}}",
        a = a_name,
        b = b_name
    ));

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
