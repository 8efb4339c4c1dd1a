//! Murmur CLI - an autonomous social feed for simulated characters.

use std::process;

use clap::Parser;
use murmur::cli::{
    AutopostCommands, Cli, Commands, ConfigCommands, PostCommands, ProfileCommands, RelCommands,
    RumorCommands,
};
use murmur::commands::{self, Context, Output, PostDraft, RelationshipEdit};
use murmur::config::ConfigOverrides;
use murmur::models::DirectionalPatch;
use murmur::storage::{BackendType, resolve_data_dir};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `murmur=debug`).
const LOG_ENV: &str = "MURMUR_LOG";

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => fail(&murmur::Error::Io(e), human),
    };

    if let Err(e) = runtime.block_on(run_command(cli)) {
        fail(&e, human);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn fail(e: &murmur::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
    process::exit(1);
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(seed) = cli.seed {
        overrides = overrides.with_seed(seed);
    }
    if let Some(ref cmd) = cli.provider_command {
        overrides = overrides.with_provider_command(cmd.clone());
    }
    if let Some(Commands::Run { enable: true }) = cli.command {
        overrides = overrides.with_auto_post_enabled(true);
    }
    overrides
}

fn patch(
    label: Option<String>,
    attitude: Option<String>,
    private: Option<String>,
    knows: Option<bool>,
) -> DirectionalPatch {
    DirectionalPatch {
        public_label: label,
        public_attitude: attitude,
        private_attitude: private,
        counterpart_knows_private: knows,
    }
}

async fn run_command(cli: Cli) -> Result<(), murmur::Error> {
    let human = cli.human_readable;
    let overrides = overrides(&cli);
    let backend = BackendType::parse(&cli.backend).unwrap_or(BackendType::Sqlite);
    let data_dir = cli.data_dir.as_deref();

    // Commands that never touch the database
    match cli.command {
        Some(Commands::Version) => {
            output(&commands::version(), human);
            return Ok(());
        }
        Some(Commands::Config { ref command }) => {
            match command {
                ConfigCommands::Show => output(&commands::config_show(data_dir, &overrides)?, human),
                ConfigCommands::Get { key } => output(&commands::config_get(data_dir, key)?, human),
                ConfigCommands::Set { key, value } => {
                    output(&commands::config_set(data_dir, key, value)?, human)
                }
            }
            return Ok(());
        }
        Some(Commands::Autopost {
            command: AutopostCommands::Enable,
        }) => {
            let dir = resolve_data_dir(data_dir)?;
            output(&commands::autopost_toggle(&dir, true)?, human);
            return Ok(());
        }
        Some(Commands::Autopost {
            command: AutopostCommands::Disable,
        }) => {
            let dir = resolve_data_dir(data_dir)?;
            output(&commands::autopost_toggle(&dir, false)?, human);
            return Ok(());
        }
        _ => {}
    }

    let ctx = Context::open(data_dir, backend, &overrides)?;

    match cli.command {
        None => output(&commands::status(&ctx)?, human),
        Some(Commands::Profile { command }) => match command {
            ProfileCommands::Import { input } => {
                output(&commands::profile_import(&ctx, &input)?, human)
            }
            ProfileCommands::List => output(&commands::profile_list(&ctx)?, human),
            ProfileCommands::Show { id } => output(&commands::profile_show(&ctx, &id)?, human),
            ProfileCommands::Remove { id } => output(&commands::profile_remove(&ctx, &id)?, human),
        },
        Some(Commands::Rel { command }) => match command {
            RelCommands::Show { a, b } => output(&commands::rel_show(&ctx, &a, &b)?, human),
            RelCommands::Save {
                a,
                b,
                label,
                attitude,
                private,
                knows,
                reverse_label,
                reverse_attitude,
                reverse_private,
                reverse_knows,
                backstory,
                visible_to,
                hidden,
            } => {
                let edit = RelationshipEdit {
                    forward: patch(label, attitude, private, knows),
                    reverse: patch(reverse_label, reverse_attitude, reverse_private, reverse_knows),
                    backstory,
                    visibility: RelationshipEdit::visibility_from(hidden, visible_to),
                };
                output(&commands::rel_save(&ctx, &a, &b, edit)?, human)
            }
            RelCommands::Delete { a, b } => output(&commands::rel_delete(&ctx, &a, &b)?, human),
            RelCommands::List => output(&commands::rel_list(&ctx)?, human),
            RelCommands::SyncToProfile { a, b } => {
                output(&commands::rel_sync_to_profile(&ctx, &a, &b)?, human)
            }
            RelCommands::SyncFromProfile { a, b } => {
                output(&commands::rel_sync_from_profile(&ctx, &a, &b)?, human)
            }
        },
        Some(Commands::Rumor { command }) => match command {
            RumorCommands::Add {
                observer,
                a,
                b,
                belief,
                reverse_belief,
            } => output(
                &commands::rumor_add(&ctx, &observer, &a, &b, belief, reverse_belief)?,
                human,
            ),
            RumorCommands::Show { observer, a, b } => {
                output(&commands::rumor_show(&ctx, &observer, &a, &b)?, human)
            }
            RumorCommands::Delete { observer, a, b } => {
                output(&commands::rumor_delete(&ctx, &observer, &a, &b)?, human)
            }
            RumorCommands::List { observer } => {
                output(&commands::rumor_list(&ctx, &observer)?, human)
            }
            RumorCommands::Graph { observer } => {
                output(&commands::rumor_graph(&ctx, &observer)?, human)
            }
        },
        Some(Commands::Post { command }) => match command {
            PostCommands::Create {
                text,
                author,
                media,
                visibility,
                allow,
                location,
                react,
            } => {
                let draft = PostDraft {
                    author,
                    text,
                    media,
                    visibility,
                    allow,
                    location,
                };
                output(&commands::post_create(&ctx, draft, react).await?, human)
            }
            PostCommands::List { viewer } => {
                output(&commands::post_list(&ctx, viewer.as_deref())?, human)
            }
            PostCommands::Show { id } => output(&commands::post_show(&ctx, &id)?, human),
            PostCommands::Like { id, by } => output(&commands::post_like(&ctx, &id, &by)?, human),
            PostCommands::Comment {
                id,
                text,
                by,
                reply_to,
            } => output(
                &commands::post_comment(&ctx, &id, &by, &text, reply_to.as_deref())?,
                human,
            ),
            PostCommands::Uncomment { id, comment } => {
                output(&commands::post_uncomment(&ctx, &id, &comment)?, human)
            }
            PostCommands::Delete { id } => output(&commands::post_delete(&ctx, &id)?, human),
            PostCommands::Compress { keep } => {
                output(&commands::post_compress(&ctx, keep)?, human)
            }
        },
        Some(Commands::Autopost { command }) => match command {
            AutopostCommands::Set {
                agent,
                frequency,
                style,
            } => output(
                &commands::autopost_set(&ctx, &agent, frequency.as_deref(), style)?,
                human,
            ),
            AutopostCommands::Show { agent } => {
                output(&commands::autopost_show(&ctx, agent.as_deref())?, human)
            }
            AutopostCommands::Check { agent, react } => output(
                &commands::autopost_check(&ctx, agent.as_deref(), react).await?,
                human,
            ),
            // Handled before the database is opened
            AutopostCommands::Enable | AutopostCommands::Disable => {}
        },
        Some(Commands::Catchup { agent, react }) => {
            output(&commands::catchup(&ctx, &agent, react).await?, human)
        }
        Some(Commands::Run { .. }) => output(&commands::run(&ctx).await?, human),
        Some(Commands::Config { .. }) | Some(Commands::Version) => {}
    }

    Ok(())
}
