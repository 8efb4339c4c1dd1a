//! Post storage and visibility.
//!
//! Mutations are not gated; visibility only applies to reads through
//! [`PostStore::is_visible_to`] and [`PostStore::visible_posts`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::graph::generate_id;
use crate::models::{Comment, Post, PostVisibility, is_self};
use crate::relationships::RelationshipStore;
use crate::storage::{JsonTable, KvBackend, POSTS_KEY};
use crate::{Error, Result};

/// Default number of posts kept by the retention policy.
pub const DEFAULT_MAX_POSTS: usize = 200;

/// Input for [`PostStore::create_post`].
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub author_id: String,
    pub text: String,
    pub media: Vec<String>,
    pub visibility: PostVisibility,
    pub location: Option<String>,
    pub ai_generated: bool,
    /// Backdate the post; defaults to now
    pub created_at: Option<DateTime<Utc>>,
}

impl NewPost {
    pub fn new(author_id: &str, text: impl Into<String>) -> Self {
        Self {
            author_id: author_id.to_string(),
            text: text.into(),
            ..Self::default()
        }
    }
}

pub struct PostStore {
    table: JsonTable<Vec<Post>>,
    relationships: Arc<RelationshipStore>,
    max_posts: usize,
}

impl PostStore {
    pub fn new(backend: Arc<dyn KvBackend>, relationships: Arc<RelationshipStore>) -> Self {
        Self {
            table: JsonTable::new(backend, POSTS_KEY),
            relationships,
            max_posts: DEFAULT_MAX_POSTS,
        }
    }

    /// Set how many posts the retention policy keeps.
    pub fn with_max_posts(mut self, max_posts: usize) -> Self {
        self.max_posts = max_posts.max(1);
        self
    }

    /// Create a post, then apply the retention policy.
    pub fn create_post(&self, new: NewPost) -> Result<Post> {
        if new.author_id.is_empty() {
            return Err(Error::InvalidInput("post author must not be empty".to_string()));
        }
        if new.text.trim().is_empty() && new.media.is_empty() {
            return Err(Error::InvalidInput("post has no text or media".to_string()));
        }

        let mut post = Post::new(generate_id("mp", &new.text), &new.author_id, new.text);
        post.media = new.media;
        post.visibility = new.visibility;
        post.location = new.location;
        post.ai_generated = new.ai_generated;
        if let Some(at) = new.created_at {
            post.created_at = at;
        }

        self.table.update(|posts| {
            posts.push(post.clone());
            Ok(())
        })?;
        info!(post = %post.id, author = %post.author_id, "post created");

        self.compress_old_posts(self.max_posts)?;
        Ok(post)
    }

    pub fn delete_post(&self, post_id: &str) -> Result<bool> {
        self.table.update(|posts| {
            let before = posts.len();
            posts.retain(|p| p.id != post_id);
            Ok(posts.len() != before)
        })
    }

    /// Flip `node_id`'s like on a post. Returns whether the node now likes it.
    pub fn toggle_like(&self, post_id: &str, node_id: &str) -> Result<bool> {
        self.with_post(post_id, |post| {
            if post.likes.remove(node_id) {
                Ok(false)
            } else {
                post.likes.insert(node_id.to_string());
                Ok(true)
            }
        })
    }

    /// Append a comment, optionally as a reply to an existing comment.
    pub fn add_comment(
        &self,
        post_id: &str,
        author_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Comment> {
        if author_id.is_empty() || text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "comment needs an author and text".to_string(),
            ));
        }
        let comment = self.with_post(post_id, |post| {
            let id = generate_id("mc", &format!("{}{}{}", post_id, author_id, text));
            let comment = match reply_to {
                Some(target_id) => {
                    let target = post
                        .comment(target_id)
                        .ok_or_else(|| Error::NotFound(format!("comment {}", target_id)))?;
                    Comment::reply(id, author_id, target, text.trim())
                }
                None => Comment::new(id, author_id, text.trim()),
            };
            post.comments.push(comment.clone());
            Ok(comment)
        })?;
        debug!(post = post_id, author = author_id, comment = %comment.id, "comment added");
        Ok(comment)
    }

    pub fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<bool> {
        self.with_post(post_id, |post| {
            let before = post.comments.len();
            post.comments.retain(|c| c.id != comment_id);
            Ok(post.comments.len() != before)
        })
    }

    pub fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        Ok(self.table.load()?.into_iter().find(|p| p.id == post_id))
    }

    /// All posts, newest first.
    pub fn list_posts(&self) -> Result<Vec<Post>> {
        let mut posts = self.table.load()?;
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    /// The newest `limit` posts written by `author_id`.
    pub fn recent_posts_by(&self, author_id: &str, limit: usize) -> Result<Vec<Post>> {
        Ok(self
            .list_posts()?
            .into_iter()
            .filter(|p| p.author_id == author_id)
            .take(limit)
            .collect())
    }

    /// Whether `viewer` counts as a friend of `author`.
    pub fn is_friend(&self, viewer: &str, author: &str) -> Result<bool> {
        if viewer == author || is_self(viewer) || is_self(author) {
            return Ok(true);
        }
        self.relationships.has_edge(viewer, author)
    }

    /// Whether `viewer` may see `post`.
    pub fn is_visible_to(&self, post: &Post, viewer: &str) -> Result<bool> {
        if !self.is_friend(viewer, &post.author_id)? {
            return Ok(false);
        }
        Ok(match &post.visibility {
            PostVisibility::All => true,
            PostVisibility::Private => viewer == post.author_id,
            PostVisibility::Partial { allow } => {
                viewer == post.author_id || allow.contains(viewer)
            }
        })
    }

    /// Posts `viewer` may see, newest first.
    pub fn visible_posts(&self, viewer: &str) -> Result<Vec<Post>> {
        let mut visible = Vec::new();
        for post in self.list_posts()? {
            if self.is_visible_to(&post, viewer)? {
                visible.push(post);
            }
        }
        Ok(visible)
    }

    /// Keep only the newest `max_count` posts. Returns how many were dropped.
    pub fn compress_old_posts(&self, max_count: usize) -> Result<usize> {
        let dropped = self.table.update(|posts| {
            if posts.len() <= max_count {
                return Ok(0);
            }
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let dropped = posts.len() - max_count;
            posts.truncate(max_count);
            posts.reverse();
            Ok(dropped)
        })?;
        if dropped > 0 {
            debug!(dropped, kept = max_count, "old posts pruned");
        }
        Ok(dropped)
    }

    fn with_post<R>(&self, post_id: &str, f: impl FnOnce(&mut Post) -> Result<R>) -> Result<R> {
        self.table.update(|posts| {
            let post = posts
                .iter_mut()
                .find(|p| p.id == post_id)
                .ok_or_else(|| Error::NotFound(format!("post {}", post_id)))?;
            f(post)
        })
    }
}
