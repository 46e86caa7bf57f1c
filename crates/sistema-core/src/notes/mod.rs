//! Notes view-model.
//!
//! Maps user actions onto the notes API and keeps the local sequence in step
//! with what the server confirmed. State only advances on confirmed success,
//! so there is nothing to roll back on failure.
//!
//! At most one fetch/create/update/delete runs at a time. The gate and the
//! loading flag are owned by an [`OperationGuard`] that releases both when
//! dropped, whatever path the operation took.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Note, NoteId, NotesApi};
use crate::auth::SessionProvider;

mod state;

pub use state::{EditBuffer, NotesState};

/// Operations that report failures to the user.
///
/// Each operation has two messages: a fixed one for a non-success status and
/// a prefix for failed requests, followed by the error detail. Fetch follows
/// the same pattern as the writes, so a fetch that never reached the server
/// reads `Error fetching messages: <detail>` rather than the status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Message shown when the server answers with a non-success status.
    pub fn http_failure(self) -> &'static str {
        match self {
            Operation::Fetch => "Failed to fetch messages",
            Operation::Create => "Failed to create message",
            Operation::Update => "Failed to update message",
            Operation::Delete => "Failed to delete message",
        }
    }

    /// Prefix of the message shown when the request itself failed.
    pub fn transport_failure(self) -> &'static str {
        match self {
            Operation::Fetch => "Error fetching messages",
            Operation::Create => "Error creating message",
            Operation::Update => "Error updating message",
            Operation::Delete => "Error deleting message",
        }
    }
}

/// Errors returned by the notes client.
///
/// The Display text of `Http` and `Transport` is exactly what ends up in
/// [`NotesState::error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotesError {
    /// No bearer token is available.
    #[error("Not logged in")]
    NoSession,
    /// Another operation is still in flight.
    #[error("Another operation is already in progress")]
    Busy,
    #[error("{}", op.http_failure())]
    Http { op: Operation },
    #[error("{}: {detail}", op.transport_failure())]
    Transport { op: Operation, detail: String },
}

impl NotesError {
    /// True for failures recorded in the view state.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, NotesError::Http { .. } | NotesError::Transport { .. })
    }
}

/// Observed change of the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// Token appeared: the user was registered and notes fetched.
    SignedIn,
    /// Token vanished: local state was cleared.
    SignedOut,
    Unchanged,
}

/// Holds the operation gate; releases it and clears `loading` on drop.
struct OperationGuard<'a> {
    client: &'a NotesClient,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.client.state().loading = false;
        self.client.in_flight.store(false, Ordering::Release);
    }
}

/// Notes view-model bound to one session provider.
pub struct NotesClient {
    api: NotesApi,
    session: Arc<dyn SessionProvider>,
    state: Mutex<NotesState>,
    in_flight: AtomicBool,
    observed_token: Mutex<Option<String>>,
}

impl NotesClient {
    pub fn new(api: NotesApi, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            api,
            session,
            state: Mutex::new(NotesState::default()),
            in_flight: AtomicBool::new(false),
            observed_token: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<dyn SessionProvider> {
        &self.session
    }

    /// Copy of the current view state for rendering.
    pub fn snapshot(&self) -> NotesState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, NotesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current token, renewed first if it has expired.
    async fn current_token(&self) -> Option<String> {
        if let Err(err) = self.session.refresh().await {
            warn!(error = %format!("{err:#}"), "session refresh failed");
        }
        self.session.session().token
    }

    async fn require_token(&self) -> Result<String, NotesError> {
        self.current_token().await.ok_or(NotesError::NoSession)
    }

    /// Admits one operation: sets `loading` and clears the previous error.
    fn begin(&self) -> Result<OperationGuard<'_>, NotesError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("operation rejected while another is in flight");
            return Err(NotesError::Busy);
        }
        let guard = OperationGuard { client: self };
        let mut state = self.state();
        state.loading = true;
        state.error = None;
        Ok(guard)
    }

    /// Records a failed operation in the view state.
    fn fail(&self, op: Operation, err: ApiError) -> NotesError {
        let error = match err {
            ApiError::Status { status, body } => {
                warn!(?op, %status, body = %body, "request rejected");
                NotesError::Http { op }
            }
            ApiError::Transport { message, .. } => {
                warn!(?op, error = %message, "request failed");
                NotesError::Transport {
                    op,
                    detail: message,
                }
            }
        };
        self.state().error = Some(error.to_string());
        error
    }

    /// Reacts to a change of the session token.
    ///
    /// A new session registers the user and loads the notes; a lost session
    /// clears everything local.
    pub async fn sync_session(&self) -> SessionTransition {
        let current = self.current_token().await;
        let previous = {
            let mut observed = self
                .observed_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *observed, current.clone())
        };

        match (previous.is_some(), current.is_some()) {
            (false, true) => {
                info!("session started");
                // only NoSession can surface here, and the token is present
                let _ = self.register_user().await;
                if let Err(err) = self.fetch_messages().await {
                    debug!(error = %err, "initial fetch failed");
                }
                SessionTransition::SignedIn
            }
            (true, false) => {
                info!("session ended, clearing notes");
                self.state().clear();
                SessionTransition::SignedOut
            }
            _ => SessionTransition::Unchanged,
        }
    }

    /// Registers the authenticated identity with the API.
    ///
    /// Best effort: failures are logged and swallowed, never retried.
    ///
    /// # Errors
    /// Returns [`NotesError::NoSession`] without a token.
    pub async fn register_user(&self) -> Result<(), NotesError> {
        let token = self.require_token().await?;
        match self.api.register_user(&token).await {
            Ok(()) => debug!("user registered"),
            Err(err) => warn!(error = %err, "user registration failed"),
        }
        Ok(())
    }

    /// Replaces the local sequence with the server's collection.
    ///
    /// # Errors
    /// Returns the recorded failure, or a precondition error.
    pub async fn fetch_messages(&self) -> Result<usize, NotesError> {
        let token = self.require_token().await?;
        let _guard = self.begin()?;

        match self.api.list_messages(&token).await {
            Ok(notes) => {
                let count = notes.len();
                self.state().replace_all(notes);
                debug!(count, "messages fetched");
                Ok(count)
            }
            Err(err) => Err(self.fail(Operation::Fetch, err)),
        }
    }

    /// Creates a note from `text`; blank text is ignored.
    ///
    /// # Errors
    /// Returns the recorded failure, or a precondition error.
    pub async fn create_message(&self, text: &str) -> Result<Option<Note>, NotesError> {
        let message = text.trim();
        if message.is_empty() {
            return Ok(None);
        }
        let token = self.require_token().await?;
        let _guard = self.begin()?;

        match self.api.create_message(&token, message).await {
            Ok(note) => {
                let mut state = self.state();
                state.append(note.clone());
                state.compose.clear();
                info!(id = %note.id, "message created");
                Ok(Some(note))
            }
            Err(err) => Err(self.fail(Operation::Create, err)),
        }
    }

    /// Creates a note from the compose buffer.
    ///
    /// # Errors
    /// Same as [`NotesClient::create_message`].
    pub async fn submit_compose(&self) -> Result<Option<Note>, NotesError> {
        let text = self.state().compose.clone();
        self.create_message(&text).await
    }

    /// Replaces the text of note `id`; blank text is ignored.
    ///
    /// # Errors
    /// Returns the recorded failure, or a precondition error.
    pub async fn update_message(&self, id: &NoteId, text: &str) -> Result<Option<Note>, NotesError> {
        let message = text.trim();
        if message.is_empty() {
            return Ok(None);
        }
        let token = self.require_token().await?;
        let _guard = self.begin()?;

        match self.api.update_message(&token, id, message).await {
            Ok(note) => {
                let mut state = self.state();
                if !state.replace(note.clone()) {
                    debug!(id = %note.id, "updated message was not in the local list");
                }
                state.edit = None;
                info!(id = %note.id, "message updated");
                Ok(Some(note))
            }
            Err(err) => Err(self.fail(Operation::Update, err)),
        }
    }

    /// Saves the edit buffer to its note.
    ///
    /// Returns `Ok(None)` when not editing or the buffer is blank.
    ///
    /// # Errors
    /// Same as [`NotesClient::update_message`].
    pub async fn save_edit(&self) -> Result<Option<Note>, NotesError> {
        let Some(edit) = self.state().edit.clone() else {
            return Ok(None);
        };
        self.update_message(&edit.id, &edit.text).await
    }

    /// Deletes note `id` once `confirm` agrees.
    ///
    /// Returns false when the confirmation was declined; nothing is sent then.
    ///
    /// # Errors
    /// Returns the recorded failure, or a precondition error.
    pub async fn delete_message(
        &self,
        id: &NoteId,
        confirm: impl FnOnce(&NoteId) -> bool,
    ) -> Result<bool, NotesError> {
        let token = self.require_token().await?;
        if !confirm(id) {
            debug!(%id, "delete declined");
            return Ok(false);
        }
        let _guard = self.begin()?;

        match self.api.delete_message(&token, id).await {
            Ok(()) => {
                self.state().remove(id);
                info!(%id, "message deleted");
                Ok(true)
            }
            Err(err) => Err(self.fail(Operation::Delete, err)),
        }
    }

    /// Enters edit mode for note `id`. Returns false for unknown ids.
    pub fn start_editing(&self, id: &NoteId) -> bool {
        let mut state = self.state();
        match state.get(id).cloned() {
            Some(note) => state.start_editing(&note),
            None => false,
        }
    }

    pub fn cancel_editing(&self) {
        self.state().cancel_editing();
    }

    /// Replaces the edit buffer text. Ignored outside edit mode.
    pub fn set_edit_text(&self, text: impl Into<String>) {
        if let Some(edit) = self.state().edit.as_mut() {
            edit.text = text.into();
        }
    }

    pub fn set_compose(&self, text: impl Into<String>) {
        self.state().compose = text.into();
    }
}
