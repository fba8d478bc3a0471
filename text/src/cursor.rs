//! Cursors over a piece table.
//!
//! A [`Cursor`] pairs a position and an anchor; when the two differ the span
//! between them is the selection. Every cursor registers with its table and is
//! kept valid across edits made through any other cursor on the same document.

use crate::{
    format::{Format, FormatIndex},
    piece_table::{PieceTable, TextBlock, PARAGRAPH_SEPARATOR},
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Position state shared with the table's cursor registry.
pub(crate) struct CursorState {
    pub position: usize,
    pub anchor: usize,
}

/// Cursor motions, mirroring the usual editing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOperation {
    NextCharacter,
    PreviousCharacter,
    NextWord,
    PreviousWord,
    /// Without layout a line is a block.
    StartOfLine,
    EndOfLine,
    StartOfBlock,
    EndOfBlock,
    NextBlock,
    PreviousBlock,
    Start,
    End,
}

/// Whether a motion drags the anchor along or leaves it to form a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    #[default]
    MoveAnchor,
    KeepAnchor,
}

/// An editing position in a document.
///
/// Cloning produces an independent cursor at the same spot. All mutating
/// operations form a single undo unit each, including compound ones like
/// replacing a selection.
pub struct Cursor {
    table: PieceTable,
    state: Arc<RwLock<CursorState>>,
}

impl Clone for Cursor {
    fn clone(&self) -> Self {
        let s = self.state.read();
        let state = Arc::new(RwLock::new(CursorState {
            position: s.position,
            anchor: s.anchor,
        }));
        drop(s);
        self.table.register_cursor(&state);
        Cursor {
            table: self.table.clone(),
            state,
        }
    }
}

impl Cursor {
    pub(crate) fn from_parts(table: PieceTable, state: Arc<RwLock<CursorState>>) -> Self {
        Cursor { table, state }
    }

    pub fn table(&self) -> &PieceTable {
        &self.table
    }

    pub fn position(&self) -> usize {
        self.state.read().position
    }

    pub fn anchor(&self) -> usize {
        self.state.read().anchor
    }

    pub fn has_selection(&self) -> bool {
        let s = self.state.read();
        s.position != s.anchor
    }

    pub fn selection_start(&self) -> usize {
        let s = self.state.read();
        s.position.min(s.anchor)
    }

    pub fn selection_end(&self) -> usize {
        let s = self.state.read();
        s.position.max(s.anchor)
    }

    /// Place the cursor at `position`; `KeepAnchor` extends the selection.
    pub fn set_position(&mut self, position: usize, mode: MoveMode) {
        assert!(position <= self.table.len(), "cursor position out of range");
        let mut s = self.state.write();
        s.position = position;
        if mode == MoveMode::MoveAnchor {
            s.anchor = position;
        }
    }

    /// Apply a motion. Returns false when the cursor could not move (already
    /// at the relevant boundary).
    pub fn move_position(&mut self, op: MoveOperation, mode: MoveMode) -> bool {
        let position = self.position();
        let target = match op {
            MoveOperation::NextCharacter => {
                (position < self.table.len()).then_some(position + 1)
            }
            MoveOperation::PreviousCharacter => position.checked_sub(1),
            MoveOperation::NextWord => self.next_word_boundary(position),
            MoveOperation::PreviousWord => self.previous_word_boundary(position),
            MoveOperation::StartOfLine | MoveOperation::StartOfBlock => {
                let start = self.block().position();
                (position != start).then_some(start)
            }
            MoveOperation::EndOfLine | MoveOperation::EndOfBlock => {
                let block = self.block();
                let end = block.position() + block.len();
                (position != end).then_some(end)
            }
            MoveOperation::NextBlock => {
                let mut block = self.block();
                block.next().then(|| block.position())
            }
            MoveOperation::PreviousBlock => {
                let mut block = self.block();
                block.prev().then(|| block.position())
            }
            MoveOperation::Start => (position != 0).then_some(0),
            MoveOperation::End => {
                let end = self.table.len();
                (position != end).then_some(end)
            }
        };
        match target {
            Some(target) => {
                self.set_position(target, mode);
                true
            }
            None => false,
        }
    }

    fn next_word_boundary(&self, position: usize) -> Option<usize> {
        let len = self.table.len();
        if position >= len {
            return None;
        }
        let text: Vec<char> = self.table.text_between(0, len).chars().collect();
        let mut i = position;
        while i < len && is_word(text[i]) {
            i += 1;
        }
        while i < len && !is_word(text[i]) {
            i += 1;
        }
        Some(i)
    }

    fn previous_word_boundary(&self, position: usize) -> Option<usize> {
        if position == 0 {
            return None;
        }
        let text: Vec<char> = self.table.text_between(0, self.table.len()).chars().collect();
        let mut i = position;
        while i > 0 && !is_word(text[i - 1]) {
            i -= 1;
        }
        while i > 0 && is_word(text[i - 1]) {
            i -= 1;
        }
        Some(i)
    }

    /// The block the cursor sits in.
    pub fn block(&self) -> TextBlock {
        self.table.blocks_find(self.position())
    }

    pub fn block_format(&self) -> Format {
        self.block().block_format()
    }

    pub fn block_format_index(&self) -> FormatIndex {
        self.block().block_format_index()
    }

    /// Format a freshly typed character would take at this position.
    pub fn char_format(&self) -> Format {
        self.table.format(self.char_format_index())
    }

    pub fn char_format_index(&self) -> FormatIndex {
        let position = self.position();
        if self.table.is_empty() {
            self.table.default_char_format_index()
        } else {
            self.table.char_format_index_at(position)
        }
    }

    /// The selected span with block boundaries rendered as `\n`; empty when
    /// there is no selection.
    pub fn selected_text(&self) -> String {
        if !self.has_selection() {
            return String::new();
        }
        self.table
            .text_between(self.selection_start(), self.selection_end())
    }

    /// Insert `text` at the cursor, replacing any selection. Newlines (`\n` or
    /// U+2029) become block boundaries; new blocks inherit the current block
    /// format.
    pub fn insert_text(&mut self, text: &str) {
        let format = self.char_format_index();
        self.insert_text_with_format(text, format);
    }

    /// As [`insert_text`](Self::insert_text) with an explicit char format.
    pub fn insert_text_with_format(&mut self, text: &str, format: FormatIndex) {
        self.table.begin_edit();
        if self.has_selection() {
            self.remove_selected_text();
        }
        let block_format = self.block_format_index();
        for (i, span) in text
            .split(|c| c == '\n' || c == PARAGRAPH_SEPARATOR)
            .enumerate()
        {
            if i > 0 {
                // The registry moves this cursor past the new separator.
                self.table.insert_block(self.position(), block_format, format);
            }
            if !span.is_empty() {
                self.table.insert(self.position(), span, format);
            }
        }
        self.collapse_to_position();
        self.table.end_edit();
    }

    /// Start a new block at the cursor, inheriting the current block format.
    pub fn insert_block(&mut self) {
        let block_format = self.block_format_index();
        let char_format = self.char_format_index();
        self.insert_block_with_formats(block_format, char_format);
    }

    pub fn insert_block_with_formats(
        &mut self,
        block_format: FormatIndex,
        char_format: FormatIndex,
    ) {
        self.table.begin_edit();
        if self.has_selection() {
            self.remove_selected_text();
        }
        self.table
            .insert_block(self.position(), block_format, char_format);
        self.collapse_to_position();
        self.table.end_edit();
    }

    /// Delete the selection; no-op without one.
    pub fn remove_selected_text(&mut self) {
        if !self.has_selection() {
            return;
        }
        let start = self.selection_start();
        let end = self.selection_end();
        self.table.remove(start, end - start);
        self.collapse_to_position();
    }

    /// Delete the character after the cursor (or the selection).
    pub fn delete_char(&mut self) {
        if self.has_selection() {
            self.remove_selected_text();
        } else if self.position() < self.table.len() {
            self.table.remove(self.position(), 1);
        }
    }

    /// Delete the character before the cursor (or the selection).
    pub fn delete_previous_char(&mut self) {
        if self.has_selection() {
            self.remove_selected_text();
        } else if self.position() > 0 {
            self.table.remove(self.position() - 1, 1);
        }
    }

    /// Apply `format` to the selected characters; no-op without a selection.
    pub fn set_char_format(&mut self, format: Format) {
        if !self.has_selection() {
            return;
        }
        let index = self.table.index_for_format(format);
        let start = self.selection_start();
        self.table
            .set_char_format(start, self.selection_end() - start, index);
    }

    /// Apply `format` as the block format of every block the selection
    /// touches (the cursor's own block without a selection).
    pub fn set_block_format(&mut self, format: Format) {
        let index = self.table.index_for_format(format);
        let start = self.selection_start();
        self.table
            .set_block_format(start, self.selection_end() - start, index);
    }

    fn collapse_to_position(&mut self) {
        let mut s = self.state.write();
        s.anchor = s.position;
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
