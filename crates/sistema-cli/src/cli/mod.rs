//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use sistema_core::api::NoteId;
use sistema_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "sistema")]
#[command(version)]
#[command(about = "Terminal client for the Sistema A notes API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use this bearer token instead of the OIDC login
    #[arg(
        long,
        global = true,
        env = "SISTEMA_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN"
    )]
    token: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in through the identity provider
    Login,

    /// Log out (clear cached credentials)
    Logout,

    /// Show the claims of the current session
    Whoami,

    /// Manage notes
    Notes {
        #[command(subcommand)]
        command: NotesCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum NotesCommands {
    /// Lists notes
    List,
    /// Creates a note
    Add {
        /// Text of the note
        #[arg(value_name = "TEXT")]
        text: String,
    },
    /// Replaces the text of a note
    Edit {
        /// The ID of the note to edit
        #[arg(value_name = "ID")]
        id: NoteId,
        /// New text
        #[arg(value_name = "TEXT")]
        text: String,
    },
    /// Deletes a note
    Rm {
        /// The ID of the note to delete
        #[arg(value_name = "ID")]
        id: NoteId,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = config::Config::load().context("load config")?;

    // file logging is best effort; stdout belongs to the user
    let _log_guard = match logging::init(&config.log.level, &config.log_file()) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let Cli { command, token } = cli;

    // default to the interactive shell
    let Some(command) = command else {
        let client = commands::notes::client(&config, token).await?;
        return commands::shell::run(&client).await;
    };

    match command {
        Commands::Login => commands::auth::login(&config, token.is_some()).await,
        Commands::Logout => commands::auth::logout(&config, token.is_some()).await,
        Commands::Whoami => {
            let session = commands::auth::open_session(&config, token).await?;
            commands::auth::whoami(session.as_ref())
        }

        Commands::Notes { command } => {
            let client = commands::notes::client(&config, token).await?;
            match command {
                NotesCommands::List => commands::notes::list(&client).await,
                NotesCommands::Add { text } => commands::notes::add(&client, &text).await,
                NotesCommands::Edit { id, text } => {
                    commands::notes::edit(&client, &id, &text).await
                }
                NotesCommands::Rm { id, yes } => commands::notes::remove(&client, &id, yes).await,
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
