//! Undo/redo command log
//!
//! Each entry is one user-visible edit. Piece-table edits carry full clones of
//! the table state before and after (buffer included, so a snapshot costs the
//! document text) plus the primitive position deltas needed to keep live
//! cursors consistent when the edit is replayed. Hosts can interleave their
//! own opaque [`UndoItem`] entries in the same log.

use crate::piece_table::TableState;

/// An externally supplied undo entry: an opaque pair of inverse operations
/// appended to the document's log and replayed in chronological order with the
/// piece table's own commands.
pub trait UndoItem {
    fn undo(&mut self);
    fn redo(&mut self);
}

/// One primitive length change: `chars` is positive for an insertion at
/// `position`, negative for a removal starting there.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PositionDelta {
    pub position: usize,
    pub chars: i64,
}

/// A piece-table edit: swap `before`/`after` wholesale, then replay `deltas`
/// (inverted and reversed for undo) against the registered cursors.
#[derive(Debug)]
pub(crate) struct EditCommand {
    pub before: TableState,
    pub after: TableState,
    pub deltas: Vec<PositionDelta>,
}

pub(crate) enum UndoEntry {
    Edit(EditCommand),
    Custom(Box<dyn UndoItem>),
}

#[derive(Default)]
pub(crate) struct UndoStack {
    entries: Vec<UndoEntry>,
    /// Entries `[..index]` are currently applied.
    index: usize,
    disabled: bool,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index < self.entries.len()
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Disabling clears the history; indices recorded in old snapshots must not
    /// resurface after the host opts back in.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.disabled = !enabled;
        if !enabled {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = 0;
    }

    /// Append an entry, dropping any redoable tail.
    pub fn push(&mut self, entry: UndoEntry) {
        if self.disabled {
            return;
        }
        self.entries.truncate(self.index);
        self.entries.push(entry);
        self.index = self.entries.len();
    }

    /// Step back over the most recent applied entry, handing it to the caller
    /// to revert. Returns `None` on an empty stack (a no-op for the host).
    pub fn step_back(&mut self) -> Option<&mut UndoEntry> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(&mut self.entries[self.index])
    }

    /// Step forward over the next reverted entry, handing it to the caller to
    /// reapply.
    pub fn step_forward(&mut self) -> Option<&mut UndoEntry> {
        if self.index == self.entries.len() {
            return None;
        }
        let entry = &mut self.entries[self.index];
        self.index += 1;
        Some(entry)
    }
}
