//! Best-effort parsing of model output.
//!
//! Models wrap JSON in markdown fences, prepend chatter, or ignore the format
//! entirely. Parsing strips fences, cuts out the outermost `{...}` span, and
//! only then hands the text to serde.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Plain text shorter than this is accepted when JSON parsing fails.
pub const DEGRADED_CONTENT_MAX_CHARS: usize = 500;

const FENCE: &str = "```";

/// A generated post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moment {
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Return the body of the first fenced block, or the trimmed text if unfenced.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find(FENCE) else {
        return trimmed;
    };
    let after_open = &trimmed[open + FENCE.len()..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => after_open,
    };
    match body.find(FENCE) {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// The outermost `{...}` span of `text` after fence stripping.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let body = strip_code_fences(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

/// Parse a JSON object reply into `T`.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(extract_json_object(text)?).ok()
}

/// Parse a moment reply, degrading to plain short text.
///
/// Returns `None` when the reply is neither a usable JSON object nor short
/// enough to stand in as raw content.
pub fn parse_moment(text: &str) -> Option<Moment> {
    if let Some(moment) = parse_json_reply::<Moment>(text) {
        let content = moment.content.trim();
        if !content.is_empty() {
            return Some(Moment {
                content: content.to_string(),
                images: moment
                    .images
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                location: moment
                    .location
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            });
        }
    }

    let raw = strip_code_fences(text);
    if raw.is_empty() || raw.chars().count() >= DEGRADED_CONTENT_MAX_CHARS {
        return None;
    }
    Some(Moment {
        content: raw.to_string(),
        ..Moment::default()
    })
}
