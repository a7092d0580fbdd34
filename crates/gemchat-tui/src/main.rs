//! gemchat: terminal chat with Google Gemini and a persistent history.

mod app;
mod handler;
mod tui;
mod ui;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use gemchat_core::{
    ChatRole, ChatSession, Config, ConversationStore, FailedTurnPolicy, GeminiChat, TurnProcessor,
};
use tracing_subscriber::EnvFilter;

use app::App;

#[derive(Parser)]
#[command(name = "gemchat", version)]
#[command(about = "Chat with Google Gemini in the terminal, with history that survives restarts")]
struct Cli {
    /// Gemini model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Chat history file
    #[arg(long, global = true, value_name = "PATH")]
    history: Option<PathBuf>,

    /// What to keep when a reply fails: "keep" (the unanswered message) or "rollback"
    #[arg(long, global = true, value_name = "POLICY")]
    on_failure: Option<FailedTurnPolicy>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Ask {
        /// Your message
        message: String,
    },
    /// Print the saved conversation
    History,
    /// Delete the saved conversation
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    Config::load_dotenv();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring config file: {}", e);
        Config::new()
    });
    if let Some(model) = cli.model.clone() {
        config.model = Some(model);
    }
    if let Some(history) = cli.history.clone() {
        config.history_path = Some(history);
    }
    if let Some(policy) = cli.on_failure {
        config.failed_turn_policy = Some(policy);
    }

    let command = cli.command.unwrap_or(Commands::Chat);
    let interactive = matches!(command, Commands::Chat);
    init_logging(cli.verbose, interactive)?;

    let store = ConversationStore::new(config.resolve_history_path()?);

    match command {
        Commands::Chat => run_chat(&config, store).await,
        Commands::Ask { message } => ask(&config, store, &message).await,
        Commands::History => print_history(&store),
        Commands::Clear => {
            store.clear()?;
            println!("Chat history deleted");
            Ok(())
        }
    }
}

/// Log to stderr, or to a file while the TUI owns the terminal.
fn init_logging(verbose: u8, to_file: bool) -> Result<()> {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if to_file {
        let path = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?
            .join("gemchat")
            .join("gemchat.log");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }

    Ok(())
}

/// Build the session: load history once and seed the Gemini context with it.
fn open_session(config: &Config, store: ConversationStore) -> Result<ChatSession<GeminiChat>> {
    let history = store.load()?;
    let api_key = config.resolve_api_key().unwrap_or_default();
    let chat = GeminiChat::new(&api_key, &config.resolve_model())?
        .with_base_url(&config.resolve_api_base())
        .with_history(&history);

    Ok(ChatSession::from_parts(
        store,
        history,
        TurnProcessor::new(chat),
        config.resolve_failed_turn_policy(),
    ))
}

async fn run_chat(config: &Config, store: ConversationStore) -> Result<()> {
    let session = open_session(config, store)?;
    let model = session.processor().service().model().to_string();
    let mut app = App::new(session, model);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new(Duration::from_millis(300));

    let result = run_loop(&mut terminal, &mut app, &mut events).await;
    tui::restore()?;

    // A turn in flight is never abandoned; let it finish and persist
    if app.is_loading() {
        eprintln!("Waiting for the current reply to finish...");
        app.wait_for_turn().await?;
    }
    result
}

async fn run_loop(
    terminal: &mut tui::Tui,
    app: &mut App<GeminiChat>,
    events: &mut tui::EventHandler,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(app, event)?;
        }
        app.poll_turn().await?;
    }
    Ok(())
}

async fn ask(config: &Config, store: ConversationStore, message: &str) -> Result<()> {
    let mut session = open_session(config, store)?;
    let reply = session.submit(message).await?;
    println!("{}", reply);
    Ok(())
}

fn print_history(store: &ConversationStore) -> Result<()> {
    let history = store.load()?;
    if history.is_empty() {
        println!("No saved conversation in {:?}", store.path());
        return Ok(());
    }

    for turn in history {
        let name = match turn.role {
            ChatRole::User => "You",
            ChatRole::Assistant => "Gemini",
        };
        println!("{} {}:\n{}\n", turn.role.avatar(), name, turn.content);
    }
    Ok(())
}
