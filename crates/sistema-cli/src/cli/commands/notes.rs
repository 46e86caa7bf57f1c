//! One-shot notes command handlers.

use anyhow::{Context, Result};
use sistema_core::api::{NoteId, NotesApi};
use sistema_core::config::Config;
use sistema_core::notes::NotesClient;

use super::{auth, check, confirm, shell};

/// Builds the view-model for this process.
pub async fn client(config: &Config, token: Option<String>) -> Result<NotesClient> {
    let session = auth::open_session(config, token).await?;
    let api = NotesApi::from_config(config).context("configure notes API")?;
    Ok(NotesClient::new(api, session))
}

pub async fn list(client: &NotesClient) -> Result<()> {
    let count = check(client.fetch_messages().await)?;
    if count == 0 {
        println!("No messages.");
    } else {
        print!("{}", shell::render_notes(&client.snapshot()));
    }
    Ok(())
}

pub async fn add(client: &NotesClient, text: &str) -> Result<()> {
    match check(client.create_message(text).await)? {
        Some(note) => println!("Created message {}: {}", note.id, note.message),
        None => anyhow::bail!("Message cannot be empty"),
    }
    Ok(())
}

pub async fn edit(client: &NotesClient, id: &NoteId, text: &str) -> Result<()> {
    match check(client.update_message(id, text).await)? {
        Some(note) => println!("Updated message {}: {}", note.id, note.message),
        None => anyhow::bail!("Message cannot be empty"),
    }
    Ok(())
}

pub async fn remove(client: &NotesClient, id: &NoteId, yes: bool) -> Result<()> {
    let deleted = check(
        client
            .delete_message(id, |id| yes || confirm(&format!("Delete message {id}?")))
            .await,
    )?;
    if deleted {
        println!("Deleted message {id}.");
    } else {
        println!("Delete cancelled.");
    }
    Ok(())
}
