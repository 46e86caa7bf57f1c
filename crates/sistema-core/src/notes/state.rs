//! Notes view state.
//!
//! Holds the ordered note sequence plus the transient UI state. Every
//! mutation here is local; the client only calls these after the server
//! has confirmed the change.

use crate::api::{Note, NoteId};

/// The note currently being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBuffer {
    pub id: NoteId,
    pub text: String,
}

/// Notes view state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotesState {
    /// Notes in display order.
    pub notes: Vec<Note>,

    /// Text being composed for a new note.
    pub compose: String,

    /// Edit mode target, if any.
    pub edit: Option<EditBuffer>,

    /// True while an operation is in flight.
    pub loading: bool,

    /// Most recent user-visible failure.
    pub error: Option<String>,
}

impl NotesState {
    pub fn contains(&self, id: &NoteId) -> bool {
        self.notes.iter().any(|note| &note.id == id)
    }

    pub fn get(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|note| &note.id == id)
    }

    pub fn is_editing(&self, id: &NoteId) -> bool {
        self.edit.as_ref().is_some_and(|edit| &edit.id == id)
    }

    /// Replaces the whole sequence with a fresh server listing.
    pub fn replace_all(&mut self, notes: Vec<Note>) {
        self.notes = notes;
        self.reconcile_edit();
    }

    /// Appends a created note, keeping its id unique.
    pub fn append(&mut self, note: Note) {
        self.notes.retain(|existing| existing.id != note.id);
        self.notes.push(note);
    }

    /// Replaces the entry with the same id in place.
    ///
    /// Returns false when no entry matched.
    pub fn replace(&mut self, note: Note) -> bool {
        match self.notes.iter_mut().find(|existing| existing.id == note.id) {
            Some(slot) => {
                *slot = note;
                true
            }
            None => false,
        }
    }

    /// Removes the entry with `id`, keeping the order of the rest.
    pub fn remove(&mut self, id: &NoteId) -> Option<Note> {
        let index = self.notes.iter().position(|note| &note.id == id)?;
        let removed = self.notes.remove(index);
        self.reconcile_edit();
        Some(removed)
    }

    /// Enters edit mode for `note`, seeding the buffer with its text.
    ///
    /// Returns false (and leaves edit mode untouched) when the note is not
    /// part of the sequence.
    pub fn start_editing(&mut self, note: &Note) -> bool {
        if !self.contains(&note.id) {
            return false;
        }
        self.edit = Some(EditBuffer {
            id: note.id.clone(),
            text: note.message.clone(),
        });
        true
    }

    pub fn cancel_editing(&mut self) {
        self.edit = None;
    }

    /// Drops the edit buffer when its note is gone.
    pub fn reconcile_edit(&mut self) {
        if let Some(edit) = &self.edit
            && !self.contains(&edit.id)
        {
            self.edit = None;
        }
    }

    /// Forgets everything; used when the session ends.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
