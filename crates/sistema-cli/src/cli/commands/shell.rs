//! Interactive notes shell.
//!
//! Keeps one view-model alive across commands and re-renders the list after
//! every change.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::str::FromStr;

use anyhow::Result;
use sistema_core::api::NoteId;
use sistema_core::notes::{NotesClient, NotesError, NotesState, SessionTransition};

use super::{auth, confirm, read_line};

const HELP: &str = "\
Commands:
  list              Reload messages
  add <text>        Create a message
  edit <id>         Start editing a message
  save [text]       Save the message being edited (optionally replacing its text)
  cancel            Stop editing
  rm <id>           Delete a message
  whoami            Show the current session
  login             Log in
  logout            Log out
  help              Show this help
  quit              Leave the shell";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    List,
    Add(String),
    Edit(NoteId),
    Save(Option<String>),
    Cancel,
    Rm(NoteId),
    Whoami,
    Login,
    Logout,
    Help,
    Quit,
}

impl ShellCommand {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    /// Returns a usage message for unknown commands or missing arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(name, rest)| (name, rest.trim()));

        let id = |usage: &str| NoteId::from_str(rest).map_err(|_| format!("Usage: {usage}"));
        let command = match name.to_ascii_lowercase().as_str() {
            "list" | "ls" => Self::List,
            "add" => Self::Add(rest.to_string()),
            "edit" => Self::Edit(id("edit <id>")?),
            "save" => Self::Save((!rest.is_empty()).then(|| rest.to_string())),
            "cancel" => Self::Cancel,
            "rm" | "delete" => Self::Rm(id("rm <id>")?),
            "whoami" => Self::Whoami,
            "login" => Self::Login,
            "logout" => Self::Logout,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("Unknown command `{other}`. Type `help` for commands.")),
        };
        Ok(Some(command))
    }
}

/// Renders the note list, marking the one being edited.
pub fn render_notes(state: &NotesState) -> String {
    let mut out = String::new();
    for note in &state.notes {
        let marker = if state.is_editing(&note.id) { '*' } else { ' ' };
        let _ = writeln!(out, "{marker} {:>4}  {}", note.id, note.message);
    }
    out
}

/// Renders the error banner and the note list.
pub fn render(state: &NotesState) -> String {
    let mut out = String::new();
    if let Some(error) = &state.error {
        let _ = writeln!(out, "! {error}");
    }
    if state.notes.is_empty() {
        out.push_str("  (no messages)\n");
    } else {
        out.push_str(&render_notes(state));
    }
    out
}

/// Prompt reflecting loading and edit mode.
pub fn prompt(state: &NotesState) -> String {
    if state.loading {
        return "sistema (working...)> ".to_string();
    }
    match &state.edit {
        Some(edit) => format!("sistema [editing {}]> ", edit.id),
        None => "sistema> ".to_string(),
    }
}

fn report(err: &NotesError) {
    match err {
        NotesError::NoSession => println!("! Not logged in. Type `login` first."),
        other => println!("! {other}"),
    }
}

fn show(client: &NotesClient) {
    print!("{}", render(&client.snapshot()));
}

fn announce(transition: SessionTransition, client: &NotesClient) {
    match transition {
        SessionTransition::SignedIn => {
            let name = client.session().session().display_name().map(str::to_string);
            match name {
                Some(name) => println!("Logged in as {name}."),
                None => println!("Logged in."),
            }
            show(client);
        }
        SessionTransition::SignedOut => println!("Logged out."),
        SessionTransition::Unchanged => {}
    }
}

/// Runs the shell until `quit` or end of input.
///
/// # Errors
/// Returns an error if the terminal cannot be read or written.
pub async fn run(client: &NotesClient) -> Result<()> {
    println!("Sistema A. Type `help` for commands.");
    let transition = client.sync_session().await;
    if client.session().session().is_authenticated() {
        announce(transition, client);
    } else {
        println!("Not logged in. Type `login` to start.");
    }

    loop {
        print!("{}", prompt(&client.snapshot()));
        io::stdout().flush()?;

        let Some(line) = read_line()? else {
            println!();
            break;
        };
        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        execute(client, command).await;
        // an expired session may have been renewed or dropped meanwhile
        let transition = client.sync_session().await;
        announce(transition, client);
    }
    Ok(())
}

async fn execute(client: &NotesClient, command: ShellCommand) {
    match command {
        ShellCommand::List => match client.fetch_messages().await {
            Ok(_) => show(client),
            Err(err) => report(&err),
        },
        ShellCommand::Add(text) => {
            client.set_compose(text);
            match client.submit_compose().await {
                Ok(Some(_)) => show(client),
                Ok(None) => println!("Usage: add <text>"),
                Err(err) => report(&err),
            }
        }
        ShellCommand::Edit(id) => {
            if client.start_editing(&id) {
                let text = client.snapshot().edit.map(|edit| edit.text).unwrap_or_default();
                println!("Editing {id}: {text}");
                println!("Type `save <new text>` to save or `cancel` to stop.");
            } else {
                println!("No message with id {id}.");
            }
        }
        ShellCommand::Save(text) => {
            if client.snapshot().edit.is_none() {
                println!("Not editing any message. Use `edit <id>` first.");
                return;
            }
            if let Some(text) = text {
                client.set_edit_text(text);
            }
            match client.save_edit().await {
                Ok(Some(_)) => show(client),
                Ok(None) => println!("Nothing to save: the text is empty."),
                Err(err) => report(&err),
            }
        }
        ShellCommand::Cancel => {
            client.cancel_editing();
            show(client);
        }
        ShellCommand::Rm(id) => {
            let result = client
                .delete_message(&id, |id| confirm(&format!("Delete message {id}?")))
                .await;
            match result {
                Ok(true) => show(client),
                Ok(false) => println!("Delete cancelled."),
                Err(err) => report(&err),
            }
        }
        ShellCommand::Whoami => {
            if let Err(err) = auth::whoami(client.session().as_ref()) {
                println!("! {err:#}");
            }
        }
        ShellCommand::Login => {
            if let Err(err) = client.session().login().await {
                println!("! {err:#}");
                return;
            }
            let transition = client.sync_session().await;
            announce(transition, client);
        }
        ShellCommand::Logout => {
            if let Err(err) = client.session().logout().await {
                println!("! {err:#}");
            }
            let transition = client.sync_session().await;
            announce(transition, client);
        }
        ShellCommand::Help => println!("{HELP}"),
        ShellCommand::Quit => {}
    }
}
