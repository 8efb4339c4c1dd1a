//! Integration tests for posts, auto-posting and config via CLI.

mod common;

use common::{MOMENT_PROVIDER, TestEnv};
use murmur::commands::Context;
use murmur::config::ConfigOverrides;
use murmur::storage::{AUTO_POST_SETTINGS_KEY, BackendType, KvBackend};
use predicates::prelude::*;
use serde_json::json;

fn create_post(env: &TestEnv, args: &[&str]) -> String {
    let mut full = vec!["post", "create"];
    full.extend_from_slice(args);
    let created = env.json(&full);
    created["post"]["id"].as_str().unwrap().to_string()
}

// === Posts ===

#[test]
fn test_post_create_and_show() {
    let env = TestEnv::with_agents();
    let id = create_post(
        &env,
        &["Sunset at the pier", "--media", "pier.jpg", "--location", "Pier 7"],
    );

    let post = env.json(&["post", "show", &id]);
    assert_eq!(post["author_id"], "self");
    assert_eq!(post["text"], "Sunset at the pier");
    assert_eq!(post["media"], json!(["pier.jpg"]));
    assert_eq!(post["location"], "Pier 7");
    assert_eq!(post["visibility"]["scope"], "all");
    assert_eq!(post["ai_generated"], false);
}

#[test]
fn test_post_create_rejects_empty_and_unknown_author() {
    let env = TestEnv::with_agents();
    env.mur()
        .args(["post", "create", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no text or media"));
    env.mur()
        .args(["post", "create", "hi", "--author", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_list_is_newest_first() {
    let env = TestEnv::with_agents();
    let first = create_post(&env, &["first"]);
    let second = create_post(&env, &["second"]);

    let list = env.json(&["post", "list"]);
    assert_eq!(list["count"], 2);
    assert_eq!(list["posts"][0]["id"], second.as_str());
    assert_eq!(list["posts"][1]["id"], first.as_str());
}

#[test]
fn test_agent_posts_reach_friends_only() {
    let env = TestEnv::with_agents();
    create_post(&env, &["from Ann", "--author", "a"]);

    // The operator always sees; b has no edge to a yet
    assert_eq!(env.json(&["post", "list", "--viewer", "self"])["count"], 1);
    assert_eq!(env.json(&["post", "list", "--viewer", "b"])["count"], 0);

    env.json(&["rel", "save", "a", "b", "--label", "friends"]);
    assert_eq!(env.json(&["post", "list", "--viewer", "b"])["count"], 1);
}

#[test]
fn test_partial_and_private_visibility() {
    let env = TestEnv::with_agents();
    create_post(&env, &["for a only", "--visibility", "partial", "--allow", "a"]);
    create_post(&env, &["diary", "--visibility", "private"]);

    let seen_by_a = env.json(&["post", "list", "--viewer", "a"]);
    assert_eq!(seen_by_a["count"], 1);
    assert_eq!(seen_by_a["posts"][0]["text"], "for a only");
    assert_eq!(env.json(&["post", "list", "--viewer", "b"])["count"], 0);
    assert_eq!(env.json(&["post", "list", "--viewer", "self"])["count"], 2);
}

#[test]
fn test_like_toggles() {
    let env = TestEnv::with_agents();
    let id = create_post(&env, &["like me"]);

    assert_eq!(env.json(&["post", "like", &id, "--by", "a"])["liked"], true);
    assert_eq!(env.json(&["post", "show", &id])["likes"], json!(["a"]));
    assert_eq!(env.json(&["post", "like", &id, "--by", "a"])["liked"], false);
    assert_eq!(env.json(&["post", "show", &id])["likes"], json!([]));
}

#[test]
fn test_comment_reply_and_uncomment() {
    let env = TestEnv::with_agents();
    let id = create_post(&env, &["thoughts?"]);

    let comment = env.json(&["post", "comment", &id, "looks great", "--by", "a"]);
    let comment_id = comment["id"].as_str().unwrap().to_string();

    let reply = env.json(&["post", "comment", &id, "thanks!", "--reply-to", &comment_id]);
    assert_eq!(reply["author_id"], "self");
    assert_eq!(reply["reply_to_comment_id"], comment_id.as_str());
    assert_eq!(reply["reply_to_author_id"], "a");

    env.mur()
        .args(["post", "comment", &id, "huh", "--reply-to", "mc-missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mc-missing"));

    assert_eq!(env.json(&["post", "uncomment", &id, &comment_id])["removed"], true);
    let post = env.json(&["post", "show", &id]);
    assert_eq!(post["comments"].as_array().unwrap().len(), 1);
}

#[test]
fn test_delete_and_compress() {
    let env = TestEnv::with_agents();
    let ids: Vec<String> = (0..4).map(|i| create_post(&env, &[&format!("post {}", i)])).collect();

    assert_eq!(env.json(&["post", "delete", &ids[0]])["removed"], true);
    assert_eq!(env.json(&["post", "delete", &ids[0]])["removed"], false);

    let compressed = env.json(&["post", "compress", "--keep", "2"]);
    assert_eq!(compressed["dropped"], 1);
    let list = env.json(&["post", "list"]);
    assert_eq!(list["count"], 2);
    assert_eq!(list["posts"][0]["id"], ids[3].as_str());
}

#[test]
fn test_max_posts_config_applies_on_create() {
    let env = TestEnv::with_agents();
    env.json(&["config", "set", "max-posts", "2"]);
    for i in 0..3 {
        create_post(&env, &[&format!("post {}", i)]);
    }
    let list = env.json(&["post", "list"]);
    assert_eq!(list["count"], 2);
    assert_eq!(list["posts"][1]["text"], "post 1");
}

// === Auto-post ===

#[test]
fn test_autopost_set_and_show() {
    let env = TestEnv::with_agents();
    let set = env.json(&["autopost", "set", "a", "--frequency", "4", "--style", "short and upbeat"]);
    assert_eq!(set["agent"], "a");
    assert_eq!(set["frequency"], 4.0);
    assert_eq!(set["style_hint"], "short and upbeat");

    let shown = env.json(&["autopost", "show"]);
    assert_eq!(shown["enabled"], false);
    let agents = shown["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 2);
    let b = agents.iter().find(|s| s["agent"] == "b").unwrap();
    assert_eq!(b["frequency"], "never");

    // Clearing the style hint
    let cleared = env.json(&["autopost", "set", "a", "--style", ""]);
    assert!(cleared.get("style_hint").is_none());
    assert_eq!(cleared["frequency"], 4.0);
}

#[test]
fn test_autopost_set_rejects_bad_input() {
    let env = TestEnv::with_agents();
    env.mur()
        .args(["autopost", "set", "a", "--frequency", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("frequency"));
    env.mur()
        .args(["autopost", "set", "self", "--frequency", "2"])
        .assert()
        .failure();
    env.mur()
        .args(["autopost", "set", "nobody", "--frequency", "2"])
        .assert()
        .failure();
}

#[test]
fn test_sweep_does_nothing_while_disabled() {
    let env = TestEnv::with_agents();
    env.json(&["autopost", "set", "a", "--frequency", "1"]);
    let report = env.json(&["autopost", "check"]);
    assert_eq!(report["status"], "disabled");
    assert_eq!(report["checks"], json!([]));
}

#[test]
fn test_enable_then_first_check_seeds_timer() {
    let env = TestEnv::with_agents();
    assert_eq!(env.json(&["autopost", "enable"])["value"], true);
    assert_eq!(env.json(&["autopost", "show"])["enabled"], true);
    env.json(&["autopost", "set", "a", "--frequency", "2"]);

    let report = env.json(&["autopost", "check"]);
    assert_eq!(report["status"], "completed");
    let checks = report["checks"].as_array().unwrap();
    let a = checks.iter().find(|c| c["agent"] == "a").unwrap();
    assert_eq!(a["outcome"], "seeded");
    let b = checks.iter().find(|c| c["agent"] == "b").unwrap();
    assert_eq!(b["outcome"], "never");

    // The seeded timer is not yet due
    let again = env.json(&["autopost", "check", "a"]);
    assert_eq!(again["agent"], "a");
    assert_eq!(again["outcome"], "not_due");

    assert_eq!(env.json(&["autopost", "disable"])["value"], false);
    assert_eq!(env.json(&["autopost", "check"])["status"], "disabled");
}

#[test]
fn test_catchup_publishes_backdated_post() {
    let env = TestEnv::with_agents();
    let missed = chrono::Utc::now() - chrono::Duration::hours(30);
    {
        let ctx = Context::open(Some(env.data_path()), BackendType::Sqlite, &ConfigOverrides::new())
            .unwrap();
        ctx.engine
            .backend
            .set(
                AUTO_POST_SETTINGS_KEY,
                &json!({
                    "a": {
                        "frequency": 6.0,
                        "last_auto_post_at": chrono::Utc::now().to_rfc3339(),
                        "pending_compensation": [missed.to_rfc3339()]
                    }
                }),
            )
            .unwrap();
    }

    // Without a provider the slot stays queued
    let failed = env.json(&["catchup", "a"]);
    assert!(failed["post"].is_null());
    assert_eq!(failed["pending"], 1);

    let caught_up = env.json(&["--provider-command", MOMENT_PROVIDER, "catchup", "a"]);
    assert_eq!(caught_up["pending"], 0);
    let post = &caught_up["post"];
    assert_eq!(post["author_id"], "a");
    assert_eq!(post["text"], "Caught the last ferry home");
    assert_eq!(post["location"], "Harbor");
    assert_eq!(post["ai_generated"], true);

    let created_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(post["created_at"].clone()).unwrap();
    assert_eq!(created_at.timestamp(), missed.timestamp());

    let nothing_left = env.json(&["catchup", "a"]);
    assert!(nothing_left["post"].is_null());
    assert_eq!(nothing_left["pending"], 0);
}

#[test]
fn test_catchup_rejects_operator() {
    let env = TestEnv::with_agents();
    env.mur().args(["catchup", "self"]).assert().failure();
}

// === Config ===

#[test]
fn test_config_set_get_show() {
    let env = TestEnv::new();
    assert_eq!(env.json(&["config", "get", "temperature"])["value"], json!(null));

    let set = env.json(&["config", "set", "sweep-interval-secs", "600"]);
    assert_eq!(set["value"], 600);
    assert_eq!(env.json(&["config", "get", "sweep-interval-secs"])["value"], 600);

    let show = env.json(&["config", "show"]);
    assert_eq!(show["sweep_interval_secs"]["value"], 600);
    assert_eq!(show["sweep_interval_secs"]["source"], "config");
    assert_eq!(show["max_posts"]["source"], "default");
    assert!(env.data_path().join("config.kdl").exists());
}

#[test]
fn test_config_rejects_invalid_values() {
    let env = TestEnv::new();
    env.mur()
        .args(["config", "set", "sweep-interval-secs", "5"])
        .assert()
        .failure();
    env.mur()
        .args(["config", "set", "no-such-key", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max-posts"));
    env.mur()
        .args(["config", "get", "no-such-key"])
        .assert()
        .failure();
}

#[test]
fn test_flags_override_config_in_show() {
    let env = TestEnv::new();
    env.json(&["config", "set", "seed", "7"]);
    let show = env.json(&["--seed", "9", "config", "show"]);
    assert_eq!(show["seed"]["value"], 9);
    assert_eq!(show["seed"]["source"], "cli");
}

#[test]
fn test_provider_from_environment() {
    let env = TestEnv::new();
    let status: serde_json::Value = serde_json::from_slice(
        &env.mur()
            .env("MURMUR_PROVIDER_COMMAND", "cat")
            .assert()
            .success()
            .get_output()
            .stdout,
    )
    .unwrap();
    assert_eq!(status["provider"], "cat");
}
