//! CLI argument definitions for Murmur.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Murmur - autonomous social feed for simulated characters.
///
/// Import profiles with `mur profile import`, describe how they relate with
/// `mur rel save`, then let them post on their own with `mur run`.
#[derive(Parser, Debug)]
#[command(name = "mur")]
#[command(author, version, about = "An autonomous social feed for simulated characters", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory holding murmur.db and config.kdl
    #[arg(short = 'D', long = "data-dir", global = true, env = "MURMUR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(long, global = true, default_value = "sqlite", value_parser = ["sqlite", "memory"])]
    pub backend: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Fixed RNG seed (overrides config.kdl)
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Shell command used as the language model (overrides env and config.kdl)
    #[arg(long, global = true)]
    pub provider_command: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Character profile commands
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Relationship commands
    Rel {
        #[command(subcommand)]
        command: RelCommands,
    },

    /// Rumor commands (what an observer believes about a pair)
    Rumor {
        #[command(subcommand)]
        command: RumorCommands,
    },

    /// Feed commands
    Post {
        #[command(subcommand)]
        command: PostCommands,
    },

    /// Autonomous posting settings and checks
    Autopost {
        #[command(subcommand)]
        command: AutopostCommands,
    },

    /// Backfill one missed post for an agent (oldest pending slot first)
    Catchup {
        /// Agent ID
        agent: String,

        /// Wait for the reactions and comment rounds the post triggers
        #[arg(long)]
        react: bool,
    },

    /// Run the auto-post loop until interrupted
    Run {
        /// Turn autonomous posting on for this run regardless of config.kdl
        #[arg(long)]
        enable: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show version and build information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Import a JSON array of profiles (legacy or canonical shape)
    Import {
        /// Input file, or '-' for stdin
        input: String,
    },

    /// List all profiles
    List,

    /// Show one profile
    Show {
        /// Agent ID
        id: String,
    },

    /// Remove a profile
    Remove {
        /// Agent ID
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RelCommands {
    /// Show the relationship between two nodes, oriented from the first
    Show {
        a: String,
        b: String,
    },

    /// Create or update a relationship
    ///
    /// Only the given fields change; the rest of an existing record is kept.
    /// Use 'self' for the operator.
    Save {
        a: String,
        b: String,

        /// Public label of A toward B (e.g. "colleague")
        #[arg(long)]
        label: Option<String>,

        /// Attitude A shows toward B in public
        #[arg(long)]
        attitude: Option<String>,

        /// What A privately thinks of B
        #[arg(long)]
        private: Option<String>,

        /// B knows A's private attitude
        #[arg(long)]
        knows: Option<bool>,

        /// Public label of B toward A
        #[arg(long)]
        reverse_label: Option<String>,

        /// Attitude B shows toward A in public
        #[arg(long)]
        reverse_attitude: Option<String>,

        /// What B privately thinks of A
        #[arg(long)]
        reverse_private: Option<String>,

        /// A knows B's private attitude
        #[arg(long)]
        reverse_knows: Option<bool>,

        /// Shared history of the pair
        #[arg(long)]
        backstory: Option<String>,

        /// Observers allowed to see the edge (repeatable); omit for everyone
        #[arg(long = "visible-to")]
        visible_to: Vec<String>,

        /// Hide the edge from every observer
        #[arg(long, conflicts_with = "visible_to")]
        hidden: bool,
    },

    /// Delete a relationship (tombstones profile-backed pairs)
    Delete {
        a: String,
        b: String,
    },

    /// List every live edge
    List,

    /// Copy a stored agent-operator relationship into the agent's profile
    SyncToProfile {
        a: String,
        b: String,
    },

    /// Copy an agent's profile relationship into the store
    SyncFromProfile {
        a: String,
        b: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RumorCommands {
    /// Record what an observer believes about a pair
    Add {
        /// Who holds the belief
        observer: String,
        a: String,
        b: String,

        /// What the observer thinks A feels about B
        #[arg(long)]
        belief: Option<String>,

        /// What the observer thinks B feels about A
        #[arg(long)]
        reverse_belief: Option<String>,
    },

    /// Show an observer's belief about a pair, oriented from A
    Show {
        observer: String,
        a: String,
        b: String,
    },

    /// Forget an observer's belief about a pair
    Delete {
        observer: String,
        a: String,
        b: String,
    },

    /// List an observer's rumors
    List {
        observer: String,
    },

    /// Show the graph as an observer perceives it
    Graph {
        observer: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum PostCommands {
    /// Publish a post
    Create {
        /// Post text
        text: String,

        /// Author ID (defaults to the operator)
        #[arg(long, default_value = "self")]
        author: String,

        /// Image descriptions (repeatable)
        #[arg(long)]
        media: Vec<String>,

        /// Audience: all, partial, or private
        #[arg(long, default_value = "all", value_parser = ["all", "partial", "private"])]
        visibility: String,

        /// Allowed viewers for --visibility partial (repeatable)
        #[arg(long)]
        allow: Vec<String>,

        /// Where the post was made
        #[arg(long)]
        location: Option<String>,

        /// Wait for the reactions and comment rounds the post triggers
        #[arg(long)]
        react: bool,
    },

    /// List posts, newest first
    List {
        /// Only posts this node may see
        #[arg(long)]
        viewer: Option<String>,
    },

    /// Show one post with its comments
    Show {
        /// Post ID
        id: String,
    },

    /// Toggle a like
    Like {
        /// Post ID
        id: String,

        /// Who likes it
        #[arg(long = "by", default_value = "self")]
        by: String,
    },

    /// Comment on a post
    Comment {
        /// Post ID
        id: String,

        /// Comment text
        text: String,

        #[arg(long = "by", default_value = "self")]
        by: String,

        /// Comment ID being replied to
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Delete a comment
    Uncomment {
        /// Post ID
        id: String,

        /// Comment ID
        comment: String,
    },

    /// Delete a post
    Delete {
        /// Post ID
        id: String,
    },

    /// Drop the oldest posts beyond a retention count
    Compress {
        /// Posts to keep (defaults to max-posts)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AutopostCommands {
    /// Change an agent's posting frequency or style
    Set {
        /// Agent ID
        agent: String,

        /// Hours between posts, or "never"
        #[arg(long)]
        frequency: Option<String>,

        /// Style guidance for generated posts (empty clears it)
        #[arg(long)]
        style: Option<String>,
    },

    /// Show auto-post settings (all agents when none given)
    Show {
        agent: Option<String>,
    },

    /// Run the auto-post check now (one sweep, or one agent)
    Check {
        agent: Option<String>,

        /// Wait for the reactions to any post this produces
        #[arg(long)]
        react: bool,
    },

    /// Turn autonomous posting on in config.kdl
    Enable,

    /// Turn autonomous posting off in config.kdl
    Disable,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration with value sources
    Show,

    /// Get one value from config.kdl
    Get {
        /// Configuration key
        key: String,
    },

    /// Set one value in config.kdl (empty value unsets it)
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Package version from Cargo.toml.
pub fn package_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Short git commit of the build, or "unknown".
pub fn git_commit() -> &'static str {
    env!("MUR_GIT_COMMIT")
}

/// UTC timestamp of the build.
pub fn build_timestamp() -> &'static str {
    env!("MUR_BUILD_TIMESTAMP")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rel_save_parses_both_directions() {
        let cli = Cli::try_parse_from([
            "mur", "rel", "save", "a", "b", "--label", "rival", "--reverse-private", "admires",
            "--visible-to", "c", "--visible-to", "d",
        ])
        .unwrap();
        let Some(Commands::Rel {
            command:
                RelCommands::Save {
                    label,
                    reverse_private,
                    visible_to,
                    hidden,
                    ..
                },
        }) = cli.command
        else {
            panic!("expected rel save");
        };
        assert_eq!(label.as_deref(), Some("rival"));
        assert_eq!(reverse_private.as_deref(), Some("admires"));
        assert_eq!(visible_to, vec!["c".to_string(), "d".to_string()]);
        assert!(!hidden);
    }

    #[test]
    fn test_hidden_conflicts_with_observers() {
        let err = Cli::try_parse_from(["mur", "rel", "save", "a", "b", "--hidden", "--visible-to", "c"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mur", "post", "list", "-H", "--seed", "9"]).unwrap();
        assert!(cli.human_readable);
        assert_eq!(cli.seed, Some(9));
        assert_eq!(cli.backend, "sqlite");
    }
}
