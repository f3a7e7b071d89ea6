use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lean_coffee::config::{self, Config};
use lean_coffee::{ClientError, HttpApi, IdentityResolver, SessionStore, TopicDraft, VoteToggle};
use shared::{SessionLookup, TopicStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod view;

#[derive(Parser)]
#[command(name = "lean-coffee")]
#[command(about = "Lean Coffee board in the terminal")]
#[command(version)]
struct Cli {
    /// Server URL (overrides config)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Session record id
    #[arg(long, global = true, conflicts_with = "code")]
    session: Option<String>,

    /// Six character session code
    #[arg(long, global = true)]
    code: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Board(BoardCommand),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Commands that act on a session
#[derive(Subcommand)]
enum BoardCommand {
    /// Print the board
    Show,
    /// Propose a topic
    Topic {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Vote for a topic, or take the vote back if already cast
    Vote { topic_id: String },
    /// Move a topic to todo, discussing or completed
    Move { topic_id: String, status: TopicStatus },
    /// Replace a topic's discussion notes
    Notes { topic_id: String, text: String },
    /// Comment on a topic
    Comment { topic_id: String, body: String },
    /// Keep the board on screen, refreshing until Ctrl-C
    Watch {
        /// Seconds between refreshes (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Print the whole session as JSON
    Export {
        /// Reload from the server before exporting
        #[arg(long)]
        fresh: bool,
    },
    /// Show the identity used for this session
    Whoami,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (server, name, email, avatar, poll_interval)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Show all configuration
    Show,
    /// Get the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lean_coffee=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { action } => return handle_config_command(action),
        Commands::Board(command) => command,
    };

    let lookup = match (cli.session, cli.code) {
        (Some(id), _) => SessionLookup::Id(id),
        (None, Some(code)) => SessionLookup::code(&code),
        (None, None) => bail!("Pass --session <id> or --code <code> to pick a session"),
    };

    let config = Config::load().unwrap_or_default();
    let server = cli.server.or(config.remote.server.clone());
    let api = HttpApi::new(server.as_deref())?;
    tracing::debug!("Using server {}", api.base_url());

    let store = Arc::new(SessionStore::new(api, IdentityResolver::from_default_dirs()?));
    store.bootstrap(lookup, config.profile.clone()).await?;

    match command {
        BoardCommand::Show => print!("{}", view::render(&store.snapshot())),
        BoardCommand::Topic { title, description } => {
            if title.trim().is_empty() {
                bail!("Topic title must not be empty");
            }
            let topic = store
                .submit_topic(TopicDraft {
                    description,
                    ..TopicDraft::titled(title)
                })
                .await?;
            println!("Added topic {}", topic.id);
        }
        BoardCommand::Vote { topic_id } => match store.toggle_vote(&topic_id).await {
            Ok(toggle) => {
                let action = match toggle {
                    VoteToggle::Cast(_) => "Voted for",
                    VoteToggle::Retracted(_) => "Took back your vote on",
                };
                println!("{} {} ({})", action, topic_id, votes_left(toggle.remaining_votes()));
            }
            Err(ClientError::BudgetExhausted { message }) => eprintln!("\x1b[33m{}\x1b[0m", message),
            Err(e) => return Err(e.into()),
        },
        BoardCommand::Move { topic_id, status } => {
            let topic = store.move_topic(&topic_id, status).await?;
            println!("Moved {} to {}", topic.id, topic.lifecycle().board_label());
        }
        BoardCommand::Notes { topic_id, text } => {
            store.save_notes(&topic_id, text).await?;
            println!("Notes saved");
        }
        BoardCommand::Comment { topic_id, body } => {
            let comment = store.post_comment(&topic_id, body).await?;
            println!("Added comment {}", comment.id);
        }
        BoardCommand::Watch { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.poll.interval());
            watch(&store, interval).await?;
        }
        BoardCommand::Export { fresh } => {
            let payload = store.export_session(fresh).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        BoardCommand::Whoami => {
            let user = store.current_user();
            let identity = store.identity();
            println!(
                "name: {}",
                user.as_ref().and_then(|user| user.name.as_deref()).unwrap_or("Guest")
            );
            println!("user id: {}", user.map(|user| user.id).unwrap_or_default());
            println!(
                "external id: {}",
                identity.map(|identity| identity.external_id).unwrap_or_default()
            );
            println!("{}", votes_left(store.remaining_votes()));
        }
    }

    Ok(())
}

async fn watch(store: &Arc<SessionStore<HttpApi>>, interval: Duration) -> Result<()> {
    let redraw = |snapshot: &lean_coffee::Snapshot| {
        // Clear screen and home the cursor
        print!("\x1b[2J\x1b[H{}", view::render(snapshot));
    };
    redraw(&store.snapshot());
    let subscription = store.subscribe(redraw);
    let poller = store.start_polling(interval);

    tokio::signal::ctrl_c().await?;

    poller.stop();
    store.unsubscribe(subscription);
    Ok(())
}

fn votes_left(remaining: Option<u32>) -> String {
    match remaining {
        Some(remaining) => format!("{} votes left", remaining),
        None => "unlimited votes".to_string(),
    }
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let mut config = Config::load().unwrap_or_default();
            config.set(&key, value)?;
            config.save()?;
            println!("Configuration saved");
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Show => {
            let config = Config::load()?;
            for key in config::KEYS {
                println!("{}: {}", key, config.get(key)?);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
