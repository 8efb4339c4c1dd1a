//! Service wiring.
//!
//! [`Engine`] builds every store and scheduler exactly once and hands each
//! one explicit references to its collaborators. Nothing in the crate keeps
//! global state; two engines over two backends are fully independent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::config::ResolvedConfig;
use crate::dice::Dice;
use crate::llm::CompletionProvider;
use crate::posts::PostStore;
use crate::profiles::{KvProfileSource, ProfileSource};
use crate::reaction::ReactionEngine;
use crate::relationships::{RelationshipStore, RumorOverlay};
use crate::scheduler::{
    AutoPostOptions, AutoPostScheduler, CommentOptions, MultiRoundCommentScheduler,
    RelationshipUpdateAnalyzer,
};
use crate::storage::KvBackend;

/// Global on/off switch for autonomous posting.
#[derive(Debug, Clone, Default)]
pub struct ActivityToggle(Arc<AtomicBool>);

impl ActivityToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

/// Which part of the state a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    Posts,
    Relationships,
    Settings,
}

/// Fire-and-forget notification issued after state mutations.
///
/// The engine owns no rendering; a UI implements this to redraw.
pub trait RefreshHook: Send + Sync {
    fn refresh(&self, scope: RefreshScope);
}

/// Ignores every notification.
pub struct NoopRefresh;

impl RefreshHook for NoopRefresh {
    fn refresh(&self, _scope: RefreshScope) {}
}

/// Logs every notification at debug level.
pub struct LogRefresh;

impl RefreshHook for LogRefresh {
    fn refresh(&self, scope: RefreshScope) {
        debug!(?scope, "state changed");
    }
}

/// Tunables the engine passes down to its services.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub auto_post_enabled: bool,
    pub max_posts: usize,
    pub auto_post: AutoPostOptions,
    pub comments: CommentOptions,
    pub seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            auto_post_enabled: false,
            max_posts: crate::posts::DEFAULT_MAX_POSTS,
            auto_post: AutoPostOptions::default(),
            comments: CommentOptions::default(),
            seed: None,
        }
    }
}

impl From<&ResolvedConfig> for EngineOptions {
    fn from(config: &ResolvedConfig) -> Self {
        let temperature = config.temperature.value as f32;
        Self {
            auto_post_enabled: config.auto_post_enabled.value,
            max_posts: config.max_posts.value,
            auto_post: AutoPostOptions {
                sweep_interval: config.sweep_interval(),
                temperature,
                max_pending_compensation: config.max_pending_compensation.value,
            },
            comments: CommentOptions {
                max_rounds: config.max_comment_rounds.value,
                temperature,
            },
            seed: config.seed(),
        }
    }
}

/// Every service of one Murmur instance.
pub struct Engine {
    pub backend: Arc<dyn KvBackend>,
    pub profiles: Arc<KvProfileSource>,
    pub relationships: Arc<RelationshipStore>,
    pub rumors: Arc<RumorOverlay>,
    pub posts: Arc<PostStore>,
    pub reactions: Arc<ReactionEngine>,
    pub analyzer: Arc<RelationshipUpdateAnalyzer>,
    pub comments: Arc<MultiRoundCommentScheduler>,
    pub auto_post: Arc<AutoPostScheduler>,
    pub toggle: ActivityToggle,
    pub dice: Arc<Dice>,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        provider: Arc<dyn CompletionProvider>,
        refresh: Arc<dyn RefreshHook>,
        options: EngineOptions,
    ) -> Self {
        let dice = Arc::new(match options.seed {
            Some(seed) => Dice::seeded(seed),
            None => Dice::from_entropy(),
        });
        let toggle = ActivityToggle::new(options.auto_post_enabled);

        let profiles = Arc::new(KvProfileSource::new(backend.clone()));
        let profile_source: Arc<dyn ProfileSource> = profiles.clone();
        let relationships = Arc::new(RelationshipStore::new(
            backend.clone(),
            profile_source.clone(),
        ));
        let rumors = Arc::new(RumorOverlay::new(backend.clone(), relationships.clone()));
        let posts = Arc::new(
            PostStore::new(backend.clone(), relationships.clone()).with_max_posts(options.max_posts),
        );
        let reactions = Arc::new(ReactionEngine::new(
            relationships.clone(),
            profile_source.clone(),
            dice.clone(),
        ));
        let analyzer = Arc::new(RelationshipUpdateAnalyzer::new(
            profile_source.clone(),
            relationships.clone(),
            posts.clone(),
            provider.clone(),
            refresh.clone(),
            options.comments.temperature,
        ));
        let comments = Arc::new(MultiRoundCommentScheduler::new(
            profile_source.clone(),
            relationships.clone(),
            posts.clone(),
            reactions.clone(),
            provider.clone(),
            analyzer.clone(),
            refresh.clone(),
            options.comments.clone(),
        ));
        let auto_post = Arc::new(AutoPostScheduler::new(
            backend.clone(),
            profile_source,
            relationships.clone(),
            posts.clone(),
            provider,
            comments.clone(),
            dice.clone(),
            toggle.clone(),
            refresh,
            options.auto_post.clone(),
        ));

        Self {
            backend,
            profiles,
            relationships,
            rumors,
            posts,
            reactions,
            analyzer,
            comments,
            auto_post,
            toggle,
            dice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, MurmurConfig, resolve_config};
    use crate::llm::UnconfiguredProvider;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_toggle_is_shared() {
        let toggle = ActivityToggle::new(false);
        let clone = toggle.clone();
        clone.set(true);
        assert!(toggle.is_enabled());
    }

    #[test]
    fn test_options_from_config() {
        let file = MurmurConfig {
            auto_post_enabled: Some(true),
            max_comment_rounds: Some(4),
            temperature: Some(0.5),
            seed: Some(3),
            ..Default::default()
        };
        let resolved = resolve_config(&file, &ConfigOverrides::new(), None).unwrap();
        let options = EngineOptions::from(&resolved);
        assert!(options.auto_post_enabled);
        assert_eq!(options.comments.max_rounds, 4);
        assert_eq!(options.auto_post.temperature, 0.5);
        assert_eq!(options.auto_post.max_pending_compensation, 3);
        assert_eq!(options.seed, Some(3));
    }

    #[test]
    fn test_engines_share_nothing_but_the_backend() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let engine = Engine::new(
            backend.clone(),
            Arc::new(UnconfiguredProvider),
            Arc::new(NoopRefresh),
            EngineOptions::default(),
        );
        engine
            .profiles
            .put(&crate::models::profile::CharacterProfile::new("c1", "Cy"))
            .unwrap();

        let other = Engine::new(
            backend,
            Arc::new(UnconfiguredProvider),
            Arc::new(NoopRefresh),
            EngineOptions::default(),
        );
        assert_eq!(other.profiles.agent_ids().unwrap(), vec!["c1".to_string()]);
        assert!(!other.toggle.is_enabled());
    }
}
