//! Auth command handlers.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::future::BoxFuture;
use sistema_core::api::NotesApi;
use sistema_core::auth::callback::CallbackListener;
use sistema_core::auth::{
    AuthorizationRequest, CodeReceiver, OidcSession, SessionProvider, StaticSession, mask_token,
    oauth,
};
use sistema_core::config::Config;
use sistema_core::notes::NotesClient;
use tracing::warn;

use super::{confirm, read_line};

/// How long the loopback listener waits for the browser redirect.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Completes the browser step of the login from the terminal.
///
/// Prefers capturing the redirect on the loopback redirect URI and falls
/// back to a pasted code or redirect URL.
pub struct TerminalCodeReceiver;

impl CodeReceiver for TerminalCodeReceiver {
    fn receive<'a>(&'a self, request: &'a AuthorizationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            println!("To log in to Sistema A:");
            println!();
            println!("  1. A browser window will open (or visit the URL below)");
            println!("  2. Log in and authorize access");
            println!("  3. If redirected to {}, return here to continue", request.redirect_uri);
            println!("  4. Otherwise, paste the authorization code or URL");
            println!();
            println!("Authorization URL:");
            println!("  {}", request.url);
            println!();

            // best effort, skip in tests
            if std::env::var("SISTEMA_NO_BROWSER").is_err() {
                let _ = open::that(&request.url);
            }

            let local_code = if io::stdin().is_terminal() {
                wait_for_redirect(request).await?
            } else {
                None
            };
            match local_code {
                Some(code) => Ok(code),
                None => read_pasted_code(&request.state),
            }
        })
    }
}

async fn wait_for_redirect(request: &AuthorizationRequest) -> Result<Option<String>> {
    let listener = match CallbackListener::bind(&request.redirect_uri) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "redirect capture unavailable");
            return Ok(None);
        }
    };
    println!("Waiting for the browser redirect...");

    let state = request.state.clone();
    tokio::task::spawn_blocking(move || listener.wait_for_code(&state, CALLBACK_TIMEOUT))
        .await
        .context("Redirect listener task failed")?
}

fn read_pasted_code(expected_state: &str) -> Result<String> {
    print!("Paste authorization code (or full redirect URL): ");
    io::stdout().flush()?;

    let input = read_line()?.unwrap_or_default();
    let (code, provided_state) = oauth::parse_authorization_input(&input);
    if let Some(provided) = provided_state
        && provided != expected_state
    {
        anyhow::bail!("State mismatch");
    }
    code.ok_or_else(|| anyhow!("Authorization code cannot be empty"))
}

fn oidc_session(config: &Config) -> Result<OidcSession> {
    OidcSession::new(config.auth.clone(), Arc::new(TerminalCodeReceiver))
}

/// Builds the session provider for this process.
///
/// A token from `--token` wins; otherwise the cached OIDC session is loaded
/// and refreshed.
///
/// # Errors
/// Returns an error if the OIDC session cannot be restored.
pub async fn open_session(config: &Config, token: Option<String>) -> Result<Arc<dyn SessionProvider>> {
    if let Some(token) = token {
        return Ok(Arc::new(StaticSession::with_token(token)));
    }
    let session = oidc_session(config)?;
    session.initialize().await?;
    Ok(Arc::new(session))
}

fn reject_static_token(action: &str) -> Result<()> {
    anyhow::bail!("A token was given with --token or SISTEMA_TOKEN; unset it to {action}")
}

pub async fn login(config: &Config, static_token: bool) -> Result<()> {
    if static_token {
        return reject_static_token("log in");
    }

    let session = Arc::new(oidc_session(config)?);
    if let Some(existing) = session.load_cached()? {
        println!(
            "Already logged in (token: {})",
            mask_token(&existing.access)
        );
        if !confirm("Do you want to replace the existing credentials?") {
            println!("Login cancelled.");
            return Ok(());
        }
    }

    session.login().await?;

    let identity = session.session();
    println!();
    match identity.display_name() {
        Some(name) => println!("✓ Logged in as {name}"),
        None => println!("✓ Logged in"),
    }
    println!("  Credentials saved to: {}", session.cache_path().display());

    // register the identity and warm up the list, as a fresh session does
    let client = NotesClient::new(NotesApi::from_config(config)?, session);
    client.sync_session().await;
    let state = client.snapshot();
    match state.error {
        Some(error) => println!("! {error}"),
        None => println!("  {} message(s) available", state.notes.len()),
    }
    Ok(())
}

pub async fn logout(config: &Config, static_token: bool) -> Result<()> {
    if static_token {
        return reject_static_token("log out");
    }

    let session = oidc_session(config)?;
    if session.load_cached()?.is_none() {
        println!("Not logged in (no credentials found).");
        return Ok(());
    }

    session.logout().await?;
    println!("✓ Logged out");
    println!("  Credentials removed from: {}", session.cache_path().display());
    Ok(())
}

pub fn whoami(session: &dyn SessionProvider) -> Result<()> {
    let current = session.session();
    match (&current.token, &current.claims) {
        (None, _) => println!("Not logged in."),
        (Some(_), Some(claims)) => {
            let pretty = serde_json::to_string_pretty(claims).context("format claims")?;
            println!("{pretty}");
        }
        (Some(token), None) => println!("Logged in (token: {})", mask_token(token)),
    }
    Ok(())
}
