//! Document facade.
//!
//! [`Document`] owns one [`PieceTable`] and exposes the whole-document
//! operations: construction from plain text or HTML, search, undo/redo
//! control, and change notification. Fine-grained editing goes through
//! [`Cursor`]s obtained from [`cursor`](Document::cursor).

use crate::{
    cursor::{Cursor, MoveMode},
    format::Format,
    fragment::DocumentFragment,
    html::{self, HtmlNode, ImportError},
    piece_table::{PieceTable, TextBlock},
    undo::UndoItem,
};

/// Change notifications delivered to [`Document::subscribe`] listeners.
///
/// Availability events are edge-triggered: they fire only when the value
/// actually flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Content or structure changed (edit, undo, or redo).
    ContentsChanged,
    UndoAvailable(bool),
    RedoAvailable(bool),
}

/// Where a [`find`](Document::find) match must sit relative to its word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchAnchor {
    #[default]
    Contains,
    BeginsWith,
    EndsWith,
    ExactMatch,
}

/// Options for [`Document::find`].
#[derive(Debug, Clone, Copy)]
pub struct FindFlags {
    pub case_sensitive: bool,
    pub anchor: MatchAnchor,
}

impl Default for FindFlags {
    fn default() -> Self {
        FindFlags {
            case_sensitive: true,
            anchor: MatchAnchor::Contains,
        }
    }
}

/// A rich-text document.
pub struct Document {
    table: PieceTable,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document: one block, nothing undoable.
    pub fn new() -> Self {
        Document {
            table: PieceTable::new(),
        }
    }

    /// A document holding `text`, newlines split into blocks. The seeding
    /// edit is not undoable.
    pub fn from_plain_text(text: &str) -> Self {
        let doc = Self::new();
        let mut cursor = doc.cursor();
        cursor.insert_text(text);
        doc.table.clear_undo_stack();
        doc
    }

    /// A document built from pre-parsed HTML nodes.
    pub fn from_html(nodes: &[HtmlNode]) -> Result<Self, ImportError> {
        let doc = Self::new();
        doc.set_html(nodes)?;
        doc.table.clear_undo_stack();
        Ok(doc)
    }

    pub fn table(&self) -> &PieceTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.table.block_count()
    }

    /// The whole document as plain text, blocks joined by `\n`.
    pub fn plain_text(&self) -> String {
        self.table.text_between(0, self.table.len())
    }

    /// A cursor at the start of the document.
    pub fn cursor(&self) -> Cursor {
        self.table.create_cursor(0)
    }

    /// A cursor at `position`.
    pub fn cursor_at(&self, position: usize) -> Cursor {
        self.table.create_cursor(position)
    }

    pub fn first_block(&self) -> TextBlock {
        self.table.block_at(0)
    }

    pub fn block_at(&self, index: usize) -> TextBlock {
        self.table.block_at(index)
    }

    /// Iterate the document's blocks in order.
    pub fn blocks(&self) -> impl Iterator<Item = TextBlock> + '_ {
        (0..self.table.block_count()).map(|i| self.table.block_at(i))
    }

    /// Replace the whole content with imported HTML, as one undo unit. On
    /// error the document is left untouched.
    pub fn set_html(&self, nodes: &[HtmlNode]) -> Result<(), ImportError> {
        let fragment = html::import(nodes)?;
        self.table.begin_edit();
        let mut cursor = self.cursor();
        cursor.set_position(0, MoveMode::MoveAnchor);
        cursor.set_position(self.table.len(), MoveMode::KeepAnchor);
        cursor.remove_selected_text();
        fragment.insert(&mut cursor);
        self.table.end_edit();
        Ok(())
    }

    /// Capture the whole document as a detached fragment.
    pub fn to_fragment(&self) -> DocumentFragment {
        let mut cursor = self.cursor();
        cursor.set_position(self.table.len(), MoveMode::KeepAnchor);
        DocumentFragment::from_selection(&cursor)
    }

    /// Search for `pattern` at or after `from`. A hit returns a cursor
    /// selecting the match (anchor at its start, position at its end).
    ///
    /// Matching never crosses block boundaries; word-anchored modes treat
    /// non-alphanumerics and block edges as word boundaries.
    pub fn find(&self, pattern: &str, from: usize, flags: FindFlags) -> Option<Cursor> {
        if pattern.is_empty() || from > self.table.len() {
            return None;
        }
        let fold = |text: String| -> Vec<char> {
            if flags.case_sensitive {
                text.chars().collect()
            } else {
                text.chars().map(simple_fold).collect()
            }
        };
        let needle = fold(pattern.to_owned());

        let mut block = self.table.blocks_find(from);
        loop {
            let start = block.position();
            let haystack = fold(block.text());

            let first = from.saturating_sub(start);
            if first < haystack.len() || (first == 0 && haystack.is_empty()) {
                if let Some(offset) = find_in_block(&haystack, &needle, first, flags.anchor) {
                    let match_start = start + offset;
                    let mut cursor = self.table.create_cursor(match_start);
                    cursor.set_position(match_start + needle.len(), MoveMode::KeepAnchor);
                    return Some(cursor);
                }
            }
            if !block.next() {
                return None;
            }
        }
    }

    // --- undo/redo ----------------------------------------------------------

    pub fn undo(&self) -> bool {
        self.table.undo()
    }

    pub fn redo(&self) -> bool {
        self.table.redo()
    }

    pub fn is_undo_available(&self) -> bool {
        self.table.is_undo_available()
    }

    pub fn is_redo_available(&self) -> bool {
        self.table.is_redo_available()
    }

    /// Disabling clears the history.
    pub fn set_undo_redo_enabled(&self, enabled: bool) {
        self.table.set_undo_redo_enabled(enabled);
    }

    /// Interleave an application-level undoable action into the document's
    /// history.
    pub fn append_undo_item(&self, item: Box<dyn UndoItem>) {
        self.table.append_undo_item(item);
    }

    // --- notification -------------------------------------------------------

    /// Register a change listener. Listeners must not edit the document from
    /// inside the callback.
    pub fn subscribe(&self, listener: Box<dyn FnMut(&DocumentEvent)>) {
        self.table.subscribe(listener);
    }

    // --- convenience formatting ---------------------------------------------

    /// Apply `format` to the characters of `[position, position + len)`.
    pub fn set_char_format(&self, position: usize, len: usize, format: Format) {
        let mut cursor = self.cursor_at(position);
        cursor.set_position(position + len, MoveMode::KeepAnchor);
        cursor.set_char_format(format);
    }

    /// Apply `format` to every block the range touches.
    pub fn set_block_format(&self, position: usize, len: usize, format: Format) {
        let mut cursor = self.cursor_at(position);
        cursor.set_position(position + len, MoveMode::KeepAnchor);
        cursor.set_block_format(format);
    }
}

/// Search one block's text for the needle at or after `first`.
fn find_in_block(
    haystack: &[char],
    needle: &[char],
    first: usize,
    anchor: MatchAnchor,
) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    for at in first..=haystack.len() - needle.len() {
        if haystack[at..at + needle.len()] != *needle {
            continue;
        }
        let word_start = at == 0 || !is_word(haystack[at - 1]);
        let word_end =
            at + needle.len() == haystack.len() || !is_word(haystack[at + needle.len()]);
        let accept = match anchor {
            MatchAnchor::Contains => true,
            MatchAnchor::BeginsWith => word_start,
            MatchAnchor::EndsWith => word_end,
            MatchAnchor::ExactMatch => word_start && word_end,
        };
        if accept {
            return Some(at);
        }
    }
    None
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// One-to-one case fold, so folded offsets stay document offsets. Characters
/// whose lowercase expands to several chars (e.g. U+0130) fold to themselves.
fn simple_fold(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}
