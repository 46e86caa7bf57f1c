//! CLI command handlers.

use std::io::{self, Write};

use anyhow::{Result, anyhow};
use sistema_core::notes::NotesError;

pub mod auth;
pub mod config;
pub mod notes;
pub mod shell;

/// Reads one line from stdin. Returns `None` at end of input.
pub fn read_line() -> io::Result<Option<String>> {
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Asks a `[y/N]` question; anything but `y` declines.
pub fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    read_line()
        .ok()
        .flatten()
        .is_some_and(|answer| answer.trim().eq_ignore_ascii_case("y"))
}

/// Converts a view-model error into a command error.
pub fn check<T>(result: Result<T, NotesError>) -> Result<T> {
    result.map_err(|err| match err {
        NotesError::NoSession => anyhow!("Not logged in. Run `sistema login` first."),
        other => other.into(),
    })
}
