//! Piece-table storage
//!
//! The [`PieceTable`] is the single mutable source of truth for one document's
//! content and structure: an append-only character buffer, the fragment runs
//! referencing it, the block (paragraph) list, the undo log, and the registry
//! of live cursors to notify on structural change.
//!
//! The handle is cheaply cloneable and shared by every [`crate::cursor::Cursor`]
//! bound to the document; interior state lives behind locks in the shared inner
//! (same shape as a text buffer shared across views). All operations are
//! synchronous and expected to run on the thread owning the document.
//!
//! Positions and lengths are Unicode scalar (char) offsets. Byte offsets exist
//! only inside [`Fragment`] records. Paragraph separators are not stored in the
//! buffer: the logical text is the blocks' contents joined by one separator per
//! boundary, so `len() == content chars + block_count() - 1`.

use crate::{
    cursor::{Cursor, CursorState},
    document::DocumentEvent,
    format::{Format, FormatIndex, GroupIndex},
    format_collection::FormatCollection,
    undo::{EditCommand, PositionDelta, UndoEntry, UndoItem, UndoStack},
};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// The separator character reported for block boundaries wherever a raw
/// character is needed (e.g. splitting incoming text). Plain-text extraction
/// substitutes `\n`.
pub const PARAGRAPH_SEPARATOR: char = '\u{2029}';

/// A contiguous run of buffer characters sharing one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Byte offset into the table's buffer.
    string_pos: usize,
    len_bytes: usize,
    len_chars: usize,
    pub format: FormatIndex,
}

impl Fragment {
    pub fn len_chars(&self) -> usize {
        self.len_chars
    }

    pub(crate) fn text<'a>(&self, buffer: &'a str) -> &'a str {
        &buffer[self.string_pos..self.string_pos + self.len_bytes]
    }

    /// Sub-run covering chars `[from, to)` of this fragment.
    fn slice(&self, buffer: &str, from: usize, to: usize) -> Fragment {
        debug_assert!(from <= to && to <= self.len_chars);
        let text = self.text(buffer);
        let start = char_to_byte(text, from);
        let end = char_to_byte(text, to);
        Fragment {
            string_pos: self.string_pos + start,
            len_bytes: end - start,
            len_chars: to - from,
            format: self.format,
        }
    }
}

/// Byte offset of the `ch`-th char of `text` (`text.len()` when `ch` equals the
/// char count).
fn char_to_byte(text: &str, ch: usize) -> usize {
    if ch == 0 {
        return 0;
    }
    text.char_indices()
        .nth(ch)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

/// A paragraph: its formats plus the fragments making up its content.
///
/// The separator between block `i-1` and block `i` carries block `i`'s
/// `char_format` (the formats passed to `insert_block` describe the block the
/// call creates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockRecord {
    pub block_format: FormatIndex,
    pub char_format: FormatIndex,
    pub fragments: Vec<Fragment>,
}

impl BlockRecord {
    pub fn len_chars(&self) -> usize {
        self.fragments.iter().map(Fragment::len_chars).sum()
    }
}

/// The swappable part of the table: buffer plus block list. Undo commands hold
/// full clones of this, so every snapshot is self-contained and swapping one
/// in can never dangle a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableState {
    pub buffer: String,
    pub blocks: Vec<BlockRecord>,
}

impl TableState {
    pub fn len_chars(&self) -> usize {
        let content: usize = self.blocks.iter().map(BlockRecord::len_chars).sum();
        content + self.blocks.len() - 1
    }

    /// Start position of block `index`.
    pub fn block_start(&self, index: usize) -> usize {
        self.blocks[..index]
            .iter()
            .map(|b| b.len_chars() + 1)
            .sum()
    }

    /// Map a position to `(block index, offset within block)`.
    ///
    /// The offset ranges over `0..=content`; `offset == content` addresses the
    /// separator following the block (or, for the last block, the end of the
    /// document).
    pub fn locate(&self, position: usize) -> (usize, usize) {
        let mut start = 0;
        for (i, block) in self.blocks.iter().enumerate() {
            let content = block.len_chars();
            if position <= start + content {
                return (i, position - start);
            }
            start += content + 1;
        }
        panic!(
            "position {position} out of range (document length {})",
            self.len_chars()
        );
    }

    /// Text of `[from, to)` with block boundaries rendered as `separator`.
    pub fn text_between(&self, from: usize, to: usize, separator: char) -> String {
        assert!(from <= to && to <= self.len_chars(), "invalid text range");
        let mut out = String::new();
        let (start_block, start_off) = self.locate(from);
        let (end_block, end_off) = self.locate(to);

        for bi in start_block..=end_block {
            if bi > start_block {
                out.push(separator);
            }
            let block = &self.blocks[bi];
            let local_from = if bi == start_block { start_off } else { 0 };
            let local_to = if bi == end_block { end_off } else { block.len_chars() };

            let mut offset = 0;
            for frag in &block.fragments {
                let frag_end = offset + frag.len_chars;
                if frag_end > local_from && offset < local_to {
                    let a = local_from.saturating_sub(offset);
                    let b = (local_to - offset).min(frag.len_chars);
                    out.push_str(frag.slice(&self.buffer, a, b).text(&self.buffer));
                }
                offset = frag_end;
                if offset >= local_to {
                    break;
                }
            }
        }
        out
    }
}

/// Ensure a fragment boundary at char offset `off` within `fragments`,
/// splitting a covering fragment if needed; returns the boundary's index.
fn split_at(buffer: &str, fragments: &mut Vec<Fragment>, off: usize) -> usize {
    let mut offset = 0;
    for (i, frag) in fragments.iter().enumerate() {
        if offset == off {
            return i;
        }
        if off < offset + frag.len_chars {
            let local = off - offset;
            let left = frag.slice(buffer, 0, local);
            let right = frag.slice(buffer, local, frag.len_chars);
            fragments[i] = left;
            fragments.insert(i + 1, right);
            return i + 1;
        }
        offset += frag.len_chars;
    }
    debug_assert_eq!(offset, off, "split offset beyond block content");
    fragments.len()
}

/// Merge the fragments meeting at `seam` when their formats are equal. If the
/// runs are not contiguous in the buffer the coalesced text is re-appended (the
/// buffer only grows, so snapshots stay valid).
fn coalesce_at(buffer: &mut String, fragments: &mut Vec<Fragment>, seam: usize) {
    if seam == 0 || seam >= fragments.len() {
        return;
    }
    let left = fragments[seam - 1];
    let right = fragments[seam];
    if left.format != right.format {
        return;
    }
    if left.string_pos + left.len_bytes == right.string_pos {
        fragments[seam - 1].len_bytes += right.len_bytes;
        fragments[seam - 1].len_chars += right.len_chars;
    } else {
        let merged: String = format!("{}{}", left.text(buffer), right.text(buffer));
        let string_pos = buffer.len();
        buffer.push_str(&merged);
        fragments[seam - 1] = Fragment {
            string_pos,
            len_bytes: merged.len(),
            len_chars: left.len_chars + right.len_chars,
            format: left.format,
        };
    }
    fragments.remove(seam);
}

struct EditSession {
    depth: usize,
    before: Option<TableState>,
    deltas: Vec<PositionDelta>,
}

struct Availability {
    undo: bool,
    redo: bool,
}

pub(crate) struct PieceTableInner {
    state: RwLock<TableState>,
    formats: RwLock<FormatCollection>,
    cursors: RwLock<Vec<Weak<RwLock<CursorState>>>>,
    undo: RwLock<UndoStack>,
    session: RwLock<EditSession>,
    listeners: RwLock<Vec<Box<dyn FnMut(&DocumentEvent)>>>,
    availability: RwLock<Availability>,
    default_block_format: FormatIndex,
    default_char_format: FormatIndex,
}

/// Shared handle to one document's storage.
#[derive(Clone)]
pub struct PieceTable {
    inner: Arc<PieceTableInner>,
}

impl Default for PieceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceTable {
    /// An empty document: one block carrying the default formats.
    pub fn new() -> Self {
        let mut formats = FormatCollection::new();
        let default_block_format = formats.index_for_format(Format::block_format());
        let default_char_format = formats.index_for_format(Format::char_format());

        let state = TableState {
            buffer: String::new(),
            blocks: vec![BlockRecord {
                block_format: default_block_format,
                char_format: default_char_format,
                fragments: Vec::new(),
            }],
        };

        Self {
            inner: Arc::new(PieceTableInner {
                state: RwLock::new(state),
                formats: RwLock::new(formats),
                cursors: RwLock::new(Vec::new()),
                undo: RwLock::new(UndoStack::new()),
                session: RwLock::new(EditSession {
                    depth: 0,
                    before: None,
                    deltas: Vec::new(),
                }),
                listeners: RwLock::new(Vec::new()),
                availability: RwLock::new(Availability {
                    undo: false,
                    redo: false,
                }),
                default_block_format,
                default_char_format,
            }),
        }
    }

    /// Total logical length in chars, paragraph separators included.
    pub fn len(&self) -> usize {
        self.inner.state.read().len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block_count(&self) -> usize {
        self.inner.state.read().blocks.len()
    }

    pub fn default_block_format_index(&self) -> FormatIndex {
        self.inner.default_block_format
    }

    pub fn default_char_format_index(&self) -> FormatIndex {
        self.inner.default_char_format
    }

    /// Whether the two handles refer to the same storage.
    pub fn same_table(&self, other: &PieceTable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- format collection access -------------------------------------------

    pub fn index_for_format(&self, format: Format) -> FormatIndex {
        self.inner.formats.write().index_for_format(format)
    }

    pub fn format(&self, index: FormatIndex) -> Format {
        self.inner.formats.read().format(index).clone()
    }

    pub fn has_format_cached(&self, format: &Format) -> bool {
        self.inner.formats.read().has_format_cached(format)
    }

    pub fn create_group(&self, common_format: Format) -> GroupIndex {
        self.inner.formats.write().create_group(common_format)
    }

    pub fn group_common_format(&self, group: GroupIndex) -> Format {
        let formats = self.inner.formats.read();
        formats.format(formats.group_common_format(group)).clone()
    }

    pub fn set_group_common_format(&self, group: GroupIndex, common_format: Format) {
        self.inner
            .formats
            .write()
            .set_group_common_format(group, common_format)
    }

    pub(crate) fn with_formats_mut<R>(&self, f: impl FnOnce(&mut FormatCollection) -> R) -> R {
        f(&mut self.inner.formats.write())
    }

    /// Read access to the table state and formats together, for walkers that
    /// need a consistent view (fragment extraction, invariant checks).
    pub(crate) fn with_parts<R>(
        &self,
        f: impl FnOnce(&TableState, &FormatCollection) -> R,
    ) -> R {
        let state = self.inner.state.read();
        let formats = self.inner.formats.read();
        f(&state, &formats)
    }

    // --- cursors ------------------------------------------------------------

    /// Create a cursor bound to this table at `position`.
    pub fn create_cursor(&self, position: usize) -> Cursor {
        assert!(position <= self.len(), "cursor position out of range");
        let state = Arc::new(RwLock::new(CursorState {
            position,
            anchor: position,
        }));
        self.inner.cursors.write().push(Arc::downgrade(&state));
        Cursor::from_parts(self.clone(), state)
    }

    pub(crate) fn register_cursor(&self, state: &Arc<RwLock<CursorState>>) {
        self.inner.cursors.write().push(Arc::downgrade(state));
    }

    fn adjust_cursors(&self, position: usize, delta: i64) {
        let mut cursors = self.inner.cursors.write();
        cursors.retain(|weak| weak.strong_count() > 0);
        for weak in cursors.iter() {
            if let Some(state) = weak.upgrade() {
                let mut s = state.write();
                s.position = adjust_offset(s.position, position, delta);
                s.anchor = adjust_offset(s.anchor, position, delta);
            }
        }
    }

    // --- edit grouping ------------------------------------------------------

    /// Open (or nest into) an edit group; the matching [`end_edit`] closes it.
    /// All primitive mutations inside one group form a single undo unit.
    pub(crate) fn begin_edit(&self) {
        let mut session = self.inner.session.write();
        session.depth += 1;
        if session.depth == 1 {
            session.before = Some(self.inner.state.read().clone());
            session.deltas.clear();
        }
    }

    pub(crate) fn end_edit(&self) {
        let command = {
            let mut session = self.inner.session.write();
            assert!(session.depth > 0, "end_edit without begin_edit");
            session.depth -= 1;
            if session.depth > 0 {
                None
            } else {
                let before = session
                    .before
                    .take()
                    .expect("edit session missing before-state");
                let after = self.inner.state.read().clone();
                let deltas = std::mem::take(&mut session.deltas);
                (before != after).then_some(EditCommand {
                    before,
                    after,
                    deltas,
                })
            }
        };

        if let Some(command) = command {
            self.inner.undo.write().push(UndoEntry::Edit(command));
            self.emit_after_change();
        }
    }

    fn record_delta(&self, position: usize, chars: i64) {
        let mut session = self.inner.session.write();
        debug_assert!(session.depth > 0, "primitive mutation outside an edit");
        session.deltas.push(PositionDelta { position, chars });
    }

    // --- primitive mutations ------------------------------------------------

    /// Insert `text` at `position` as fragments carrying `format`.
    ///
    /// Never auto-splits: `text` must not contain `\n` or the paragraph
    /// separator. Callers ([`Cursor::insert_text`], fragment insertion) split
    /// on separators and call [`insert_block`](Self::insert_block) between
    /// spans.
    pub fn insert(&self, position: usize, text: &str, format: FormatIndex) {
        assert!(
            text.chars().all(|c| c != '\n' && c != PARAGRAPH_SEPARATOR),
            "insert text must not contain paragraph separators"
        );
        if text.is_empty() {
            return;
        }

        self.begin_edit();
        let len_chars = text.chars().count();
        {
            let mut state = self.inner.state.write();
            assert!(position <= state.len_chars(), "insert position out of range");
            debug_assert!(
                (format.0 as usize) < self.inner.formats.read().num_formats(),
                "foreign format index"
            );

            let (block_index, offset) = state.locate(position);

            let string_pos = state.buffer.len();
            state.buffer.push_str(text);
            let fragment = Fragment {
                string_pos,
                len_bytes: text.len(),
                len_chars,
                format,
            };

            // Build the new block list aside and swap it in whole.
            let mut blocks = state.blocks.clone();
            let block = &mut blocks[block_index];
            let at = split_at(&state.buffer, &mut block.fragments, offset);

            // Typing extends the previous run instead of fragmenting per call.
            let extended = at > 0 && {
                let left = &mut block.fragments[at - 1];
                if left.format == format && left.string_pos + left.len_bytes == string_pos {
                    left.len_bytes += fragment.len_bytes;
                    left.len_chars += fragment.len_chars;
                    true
                } else {
                    false
                }
            };
            if !extended {
                block.fragments.insert(at, fragment);
            }
            state.blocks = blocks;
        }

        tracing::debug!(position, chars = len_chars, "insert");
        self.record_delta(position, len_chars as i64);
        self.adjust_cursors(position, len_chars as i64);
        self.end_edit();
    }

    /// Split the block at `position`, creating a new block carrying the given
    /// formats after the inserted separator.
    pub fn insert_block(
        &self,
        position: usize,
        block_format: FormatIndex,
        char_format: FormatIndex,
    ) {
        self.begin_edit();
        {
            let mut state = self.inner.state.write();
            assert!(
                position <= state.len_chars(),
                "insert_block position out of range"
            );

            let (block_index, offset) = state.locate(position);

            let mut blocks = state.blocks.clone();
            let at = split_at(&state.buffer, &mut blocks[block_index].fragments, offset);
            let tail = blocks[block_index].fragments.split_off(at);
            blocks.insert(
                block_index + 1,
                BlockRecord {
                    block_format,
                    char_format,
                    fragments: tail,
                },
            );
            state.blocks = blocks;
        }

        tracing::debug!(position, "insert_block");
        self.record_delta(position, 1);
        self.adjust_cursors(position, 1);
        self.end_edit();
    }

    /// Delete the half-open char range `[position, position + len)`, merging
    /// blocks whose separators fall inside it. Cursors inside the range clamp
    /// to `position`.
    pub fn remove(&self, position: usize, len: usize) {
        if len == 0 {
            return;
        }

        self.begin_edit();
        {
            let mut state = self.inner.state.write();
            assert!(
                position + len <= state.len_chars(),
                "remove range out of bounds"
            );

            let (start_block, start_off) = state.locate(position);
            let (end_block, end_off) = state.locate(position + len);

            let mut buffer = std::mem::take(&mut state.buffer);
            let mut blocks = state.blocks.clone();

            if start_block == end_block {
                let fragments = &mut blocks[start_block].fragments;
                let a = split_at(&buffer, fragments, start_off);
                let b = split_at(&buffer, fragments, end_off);
                fragments.drain(a..b);
                coalesce_at(&mut buffer, fragments, a);
            } else {
                let mut merged = {
                    let head = &mut blocks[start_block].fragments;
                    let a = split_at(&buffer, head, start_off);
                    head.truncate(a);
                    std::mem::take(&mut blocks[start_block].fragments)
                };
                let seam = merged.len();
                {
                    let tail = &mut blocks[end_block].fragments;
                    let b = split_at(&buffer, tail, end_off);
                    merged.extend(tail.split_off(b));
                }
                coalesce_at(&mut buffer, &mut merged, seam);
                blocks[start_block].fragments = merged;
                blocks.drain(start_block + 1..=end_block);
            }

            state.buffer = buffer;
            state.blocks = blocks;
        }

        tracing::debug!(position, len, "remove");
        self.record_delta(position, -(len as i64));
        self.adjust_cursors(position, -(len as i64));
        self.end_edit();
    }

    /// Apply `format` to every character of `[position, position + len)`,
    /// separators included.
    pub fn set_char_format(&self, position: usize, len: usize, format: FormatIndex) {
        if len == 0 {
            return;
        }

        self.begin_edit();
        {
            let mut state = self.inner.state.write();
            assert!(
                position + len <= state.len_chars(),
                "format range out of bounds"
            );

            let (start_block, start_off) = state.locate(position);
            let (end_block, end_off) = state.locate(position + len);

            let buffer = std::mem::take(&mut state.buffer);
            let mut blocks = state.blocks.clone();

            let mut block_start = state.blocks[..start_block]
                .iter()
                .map(|b| b.len_chars() + 1)
                .sum::<usize>();

            for bi in start_block..=end_block {
                let content = blocks[bi].len_chars();
                let local_from = if bi == start_block { start_off } else { 0 };
                let local_to = if bi == end_block { end_off } else { content };

                if local_to > local_from {
                    let fragments = &mut blocks[bi].fragments;
                    let a = split_at(&buffer, fragments, local_from);
                    let b = split_at(&buffer, fragments, local_to);
                    for frag in &mut fragments[a..b] {
                        frag.format = format;
                    }
                }

                // The trailing separator carries the following block's char
                // format.
                let separator_pos = block_start + content;
                if bi + 1 < blocks.len()
                    && separator_pos >= position
                    && separator_pos < position + len
                {
                    blocks[bi + 1].char_format = format;
                }
                block_start = separator_pos + 1;
            }

            state.buffer = buffer;
            state.blocks = blocks;
        }

        tracing::debug!(position, len, "set_char_format");
        self.end_edit();
    }

    /// Apply `format` as the block format of every block the range touches.
    pub fn set_block_format(&self, position: usize, len: usize, format: FormatIndex) {
        self.begin_edit();
        {
            let mut state = self.inner.state.write();
            assert!(
                position + len <= state.len_chars(),
                "format range out of bounds"
            );

            let (start_block, _) = state.locate(position);
            let (mut end_block, end_off) = state.locate(position + len);
            if end_block > start_block && end_off == 0 && len > 0 {
                end_block -= 1;
            }

            let mut blocks = state.blocks.clone();
            for block in &mut blocks[start_block..=end_block] {
                block.block_format = format;
            }
            state.blocks = blocks;
        }
        self.end_edit();
    }

    // --- reading ------------------------------------------------------------

    /// Text of `[from, to)` with separators rendered as `\n`.
    pub fn text_between(&self, from: usize, to: usize) -> String {
        self.inner.state.read().text_between(from, to, '\n')
    }

    /// Block format index of the block containing `position`.
    pub fn block_format_index_at(&self, position: usize) -> FormatIndex {
        let state = self.inner.state.read();
        let (block, _) = state.locate(position);
        state.blocks[block].block_format
    }

    /// Char format index at `position`: the format of the character before it
    /// (a separator counts, carrying its block's char format); at the start of
    /// the document, the first character's format.
    pub fn char_format_index_at(&self, position: usize) -> FormatIndex {
        let state = self.inner.state.read();
        let (block, offset) = state.locate(position);
        let record = &state.blocks[block];

        if offset > 0 {
            let mut acc = 0;
            for frag in &record.fragments {
                acc += frag.len_chars;
                if offset <= acc {
                    return frag.format;
                }
            }
        }
        if offset == 0 && block > 0 {
            return record.char_format;
        }
        record
            .fragments
            .first()
            .map(|f| f.format)
            .unwrap_or(record.char_format)
    }

    /// The run containing `position`: its document-position range and format.
    ///
    /// A position on a block separator yields the separator's one-char range
    /// with the following block's char format.
    pub fn find_fragment(&self, position: usize) -> (std::ops::Range<usize>, FormatIndex) {
        let state = self.inner.state.read();
        assert!(position < state.len_chars(), "position out of range");
        let (block, offset) = state.locate(position);
        let record = &state.blocks[block];
        let start = state.block_start(block);

        let content = record.len_chars();
        if offset == content {
            return (position..position + 1, state.blocks[block + 1].char_format);
        }
        let mut acc = 0;
        for frag in &record.fragments {
            let end = acc + frag.len_chars;
            if offset < end {
                return (start + acc..start + end, frag.format);
            }
            acc = end;
        }
        unreachable!("offset within content must land in a fragment");
    }

    /// The block containing `position`.
    pub fn blocks_find(&self, position: usize) -> TextBlock {
        let state = self.inner.state.read();
        let (index, _) = state.locate(position);
        TextBlock {
            table: self.clone(),
            index,
        }
    }

    /// The block at `index` (0-based).
    pub fn block_at(&self, index: usize) -> TextBlock {
        assert!(index < self.block_count(), "block index out of range");
        TextBlock {
            table: self.clone(),
            index,
        }
    }

    // --- undo/redo ----------------------------------------------------------

    pub fn is_undo_available(&self) -> bool {
        self.inner.undo.read().can_undo()
    }

    pub fn is_redo_available(&self) -> bool {
        self.inner.undo.read().can_redo()
    }

    pub fn set_undo_redo_enabled(&self, enabled: bool) {
        self.inner.undo.write().set_enabled(enabled);
    }

    pub fn is_undo_redo_enabled(&self) -> bool {
        self.inner.undo.read().is_enabled()
    }

    pub(crate) fn clear_undo_stack(&self) {
        self.inner.undo.write().clear();
        let mut availability = self.inner.availability.write();
        availability.undo = false;
        availability.redo = false;
    }

    /// Append an externally supplied undo item to the log.
    pub fn append_undo_item(&self, item: Box<dyn UndoItem>) {
        self.inner.undo.write().push(UndoEntry::Custom(item));
        self.emit_availability();
    }

    /// Revert the most recent edit. Returns `false` on an empty stack.
    pub fn undo(&self) -> bool {
        {
            let mut undo = self.inner.undo.write();
            let Some(entry) = undo.step_back() else {
                return false;
            };
            match entry {
                UndoEntry::Edit(command) => {
                    let before = command.before.clone();
                    let deltas = command.deltas.clone();
                    *self.inner.state.write() = before;
                    for delta in deltas.iter().rev() {
                        self.adjust_cursors(delta.position, -delta.chars);
                    }
                }
                UndoEntry::Custom(item) => item.undo(),
            }
        }
        tracing::debug!("undo");
        self.emit_after_change();
        true
    }

    /// Reapply the most recently undone edit. Returns `false` if there is
    /// nothing to redo.
    pub fn redo(&self) -> bool {
        {
            let mut undo = self.inner.undo.write();
            let Some(entry) = undo.step_forward() else {
                return false;
            };
            match entry {
                UndoEntry::Edit(command) => {
                    let after = command.after.clone();
                    let deltas = command.deltas.clone();
                    *self.inner.state.write() = after;
                    for delta in deltas.iter() {
                        self.adjust_cursors(delta.position, delta.chars);
                    }
                }
                UndoEntry::Custom(item) => item.redo(),
            }
        }
        tracing::debug!("redo");
        self.emit_after_change();
        true
    }

    // --- change notification ------------------------------------------------

    /// Register a change listener. Listeners must not edit the document or
    /// subscribe further listeners from inside the callback.
    pub fn subscribe(&self, listener: Box<dyn FnMut(&DocumentEvent)>) {
        self.inner.listeners.write().push(listener);
    }

    fn emit(&self, event: &DocumentEvent) {
        for listener in self.inner.listeners.write().iter_mut() {
            listener(event);
        }
    }

    fn emit_after_change(&self) {
        self.emit(&DocumentEvent::ContentsChanged);
        self.emit_availability();
    }

    fn emit_availability(&self) {
        let (undo, redo) = {
            let stack = self.inner.undo.read();
            (stack.can_undo(), stack.can_redo())
        };
        let (undo_changed, redo_changed) = {
            let mut availability = self.inner.availability.write();
            let changed = (availability.undo != undo, availability.redo != redo);
            availability.undo = undo;
            availability.redo = redo;
            changed
        };
        if undo_changed {
            self.emit(&DocumentEvent::UndoAvailable(undo));
        }
        if redo_changed {
            self.emit(&DocumentEvent::RedoAvailable(redo));
        }
    }
}

fn adjust_offset(offset: usize, change_pos: usize, delta: i64) -> usize {
    if delta >= 0 {
        if offset >= change_pos {
            offset + delta as usize
        } else {
            offset
        }
    } else {
        let removed = (-delta) as usize;
        if offset >= change_pos + removed {
            offset - removed
        } else if offset > change_pos {
            change_pos
        } else {
            offset
        }
    }
}

/// Read-only access to one block of a piece table.
///
/// Mainly useful for layouting or inspecting the paragraph structure; the
/// handle stays cheap because it re-reads the table on every accessor.
#[derive(Clone)]
pub struct TextBlock {
    table: PieceTable,
    index: usize,
}

impl TextBlock {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Starting position of the block within the document.
    pub fn position(&self) -> usize {
        self.table.inner.state.read().block_start(self.index)
    }

    /// Length of the block's content in chars (separator not included).
    pub fn len(&self) -> usize {
        self.table.inner.state.read().blocks[self.index].len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `position` falls within the block's content.
    pub fn contains(&self, position: usize) -> bool {
        let start = self.position();
        position >= start && position < start + self.len() + 1
    }

    /// The paragraph of plain text the block holds.
    pub fn text(&self) -> String {
        let state = self.table.inner.state.read();
        let block = &state.blocks[self.index];
        let mut out = String::new();
        for frag in &block.fragments {
            out.push_str(frag.text(&state.buffer));
        }
        out
    }

    /// Content runs as `(text, format)` pairs.
    pub fn fragments(&self) -> Vec<(String, FormatIndex)> {
        let state = self.table.inner.state.read();
        let block = &state.blocks[self.index];
        block
            .fragments
            .iter()
            .map(|f| (f.text(&state.buffer).to_owned(), f.format))
            .collect()
    }

    pub fn block_format_index(&self) -> FormatIndex {
        self.table.inner.state.read().blocks[self.index].block_format
    }

    pub fn char_format_index(&self) -> FormatIndex {
        self.table.inner.state.read().blocks[self.index].char_format
    }

    pub fn block_format(&self) -> Format {
        self.table.format(self.block_format_index())
    }

    pub fn char_format(&self) -> Format {
        self.table.format(self.char_format_index())
    }

    /// Move to the next block; returns false at the end of the document.
    pub fn next(&mut self) -> bool {
        if self.index + 1 < self.table.block_count() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Move to the previous block; returns false at the start of the document.
    pub fn prev(&mut self) -> bool {
        if self.index > 0 {
            self.index -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{bold_format, check_invariants, fragment_texts};

    fn table() -> PieceTable {
        PieceTable::new()
    }

    #[test]
    fn new_table_is_one_empty_block() {
        let pt = table();
        assert_eq!(pt.len(), 0);
        assert_eq!(pt.block_count(), 1);
        assert!(pt.is_empty());
    }

    #[test]
    fn insert_and_read_back() {
        quill_log::test();
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "hello", fmt);
        assert_eq!(pt.len(), 5);
        assert_eq!(pt.text_between(0, 5), "hello");
        check_invariants(&pt);
    }

    #[test]
    fn insert_mid_fragment_splits() {
        let pt = table();
        let f1 = pt.default_char_format_index();
        let f2 = pt.index_for_format({
            let mut f = Format::char_format();
            f.set(
                crate::format::PropertyKey::FontItalic,
                crate::format::PropertyValue::Bool(true),
            );
            f
        });
        pt.insert(0, "held", f1);
        pt.insert(2, "lo wor", f2);
        assert_eq!(pt.text_between(0, pt.len()), "hello world");
        let block = pt.block_at(0);
        assert_eq!(
            block.fragments(),
            vec![
                ("he".to_owned(), f1),
                ("lo wor".to_owned(), f2),
                ("ld".to_owned(), f1),
            ]
        );
        check_invariants(&pt);
    }

    #[test]
    fn consecutive_typing_extends_one_fragment() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        for (i, ch) in ["a", "b", "c"].iter().enumerate() {
            pt.insert(i, ch, fmt);
        }
        assert_eq!(fragment_texts(&pt, 0), ["abc"]);
        check_invariants(&pt);
    }

    #[test]
    fn insert_block_splits_content() {
        let pt = table();
        let cf = pt.default_char_format_index();
        let bf = pt.default_block_format_index();
        pt.insert(0, "helloworld", cf);
        pt.insert_block(5, bf, cf);
        assert_eq!(pt.block_count(), 2);
        assert_eq!(pt.len(), 11);
        assert_eq!(pt.text_between(0, 11), "hello\nworld");
        assert_eq!(pt.block_at(0).text(), "hello");
        assert_eq!(pt.block_at(1).text(), "world");
        check_invariants(&pt);
    }

    #[test]
    fn remove_within_block_merges_same_format() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "ABCDE", fmt);
        pt.remove(1, 3);
        assert_eq!(pt.text_between(0, pt.len()), "AE");
        assert_eq!(pt.block_at(0).fragments(), vec![("AE".to_owned(), fmt)]);
        check_invariants(&pt);
    }

    #[test]
    fn remove_across_blocks_merges_them() {
        let pt = table();
        let cf = pt.default_char_format_index();
        let bf = pt.default_block_format_index();
        pt.insert(0, "helloworld", cf);
        pt.insert_block(5, bf, cf);
        // remove "lo\nwo" -> "helrld"
        pt.remove(3, 5);
        assert_eq!(pt.block_count(), 1);
        assert_eq!(pt.text_between(0, pt.len()), "helrld");
        check_invariants(&pt);
    }

    #[test]
    fn remove_separator_only_merges_blocks() {
        let pt = table();
        let cf = pt.default_char_format_index();
        let bf = pt.default_block_format_index();
        pt.insert(0, "ab", cf);
        pt.insert_block(1, bf, cf);
        assert_eq!(pt.text_between(0, 3), "a\nb");
        pt.remove(1, 1);
        assert_eq!(pt.block_count(), 1);
        assert_eq!(pt.text_between(0, 2), "ab");
        assert_eq!(pt.block_at(0).fragments(), vec![("ab".to_owned(), cf)]);
        check_invariants(&pt);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn insert_past_end_is_a_programmer_error() {
        let pt = table();
        pt.insert(1, "x", pt.default_char_format_index());
    }

    #[test]
    #[should_panic(expected = "must not contain paragraph separators")]
    fn raw_insert_rejects_separators() {
        let pt = table();
        pt.insert(0, "a\nb", pt.default_char_format_index());
    }

    #[test]
    fn undo_redo_round_trip() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "ABCDE", fmt);
        pt.remove(1, 3);
        assert_eq!(pt.text_between(0, pt.len()), "AE");

        assert!(pt.undo());
        assert_eq!(pt.text_between(0, pt.len()), "ABCDE");
        assert!(pt.undo());
        assert_eq!(pt.len(), 0);
        assert!(!pt.undo());

        assert!(pt.redo());
        assert_eq!(pt.text_between(0, pt.len()), "ABCDE");
        assert!(pt.redo());
        assert_eq!(pt.text_between(0, pt.len()), "AE");
        assert!(!pt.redo());
        check_invariants(&pt);
    }

    #[test]
    fn undo_restores_structure_and_formats() {
        let pt = table();
        let fmt = pt.index_for_format(bold_format());
        pt.insert(0, "ABCDE", fmt);
        pt.remove(1, 3);
        pt.undo();
        assert_eq!(pt.text_between(0, 5), "ABCDE");
        let frags = pt.block_at(0).fragments();
        assert!(frags.iter().all(|(_, f)| *f == fmt));
        assert_eq!(
            frags.iter().map(|(t, _)| t.as_str()).collect::<String>(),
            "ABCDE"
        );
        pt.redo();
        assert_eq!(pt.block_at(0).fragments(), vec![("AE".to_owned(), fmt)]);
        check_invariants(&pt);
    }

    #[test]
    fn new_edit_truncates_redo_tail() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "one", fmt);
        pt.insert(3, "two", fmt);
        pt.undo();
        pt.insert(3, "3", fmt);
        assert!(!pt.is_redo_available());
        assert_eq!(pt.text_between(0, pt.len()), "one3");
    }

    #[test]
    fn cursors_shift_on_insert_and_clamp_on_remove() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "0123456789012345678901234", fmt);

        let c1 = pt.create_cursor(10);
        let c2 = pt.create_cursor(20);

        pt.remove(5, 10);
        assert_eq!(c1.position(), 5, "cursor inside the removal clamps");
        assert_eq!(c2.position(), 10, "cursor past the removal shifts back");

        pt.insert(5, "xx", fmt);
        assert_eq!(c1.position(), 7);
        assert_eq!(c2.position(), 12);
    }

    #[test]
    fn cursor_adjustment_reverts_on_undo() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "hello world", fmt);
        let c = pt.create_cursor(11);
        pt.remove(0, 6);
        assert_eq!(c.position(), 5);
        pt.undo();
        assert_eq!(c.position(), 11);
        pt.redo();
        assert_eq!(c.position(), 5);
    }

    #[test]
    fn dropping_a_cursor_deregisters_it() {
        let pt = table();
        let fmt = pt.default_char_format_index();
        pt.insert(0, "abc", fmt);
        {
            let _temp = pt.create_cursor(1);
        }
        // Must not panic or touch the dead cursor.
        pt.insert(0, "x", fmt);
        assert_eq!(pt.text_between(0, 4), "xabc");
    }

    #[test]
    fn set_char_format_retags_range() {
        let pt = table();
        let plain = pt.default_char_format_index();
        let bold = pt.index_for_format(bold_format());
        pt.insert(0, "hello", plain);
        pt.set_char_format(1, 3, bold);
        assert_eq!(
            pt.block_at(0).fragments(),
            vec![
                ("h".to_owned(), plain),
                ("ell".to_owned(), bold),
                ("o".to_owned(), plain),
            ]
        );
        pt.undo();
        assert_eq!(pt.block_at(0).fragments(), vec![("hello".to_owned(), plain)]);
        check_invariants(&pt);
    }

    #[test]
    fn find_fragment_locates_runs_and_separators() {
        let pt = table();
        let plain = pt.default_char_format_index();
        let bold = pt.index_for_format(bold_format());
        let bf = pt.default_block_format_index();
        pt.insert(0, "ab", plain);
        pt.insert(2, "cd", bold);
        pt.insert_block(4, bf, bold);
        pt.insert(5, "ef", plain);

        assert_eq!(pt.find_fragment(1), (0..2, plain));
        assert_eq!(pt.find_fragment(2), (2..4, bold));
        assert_eq!(pt.find_fragment(4), (4..5, bold), "separator run");
        assert_eq!(pt.find_fragment(6), (5..7, plain));
    }

    #[test]
    fn group_format_change_is_seen_through_every_member() {
        use crate::format::ListStyle;

        let pt = table();
        let cf = pt.default_char_format_index();
        let bf = pt.default_block_format_index();
        pt.insert(0, "onetwo", cf);
        pt.insert_block(3, bf, cf);

        let group = pt.create_group(Format::list_format(ListStyle::Disc));
        let member = pt.index_for_format(Format::block_format().with_group(group));
        pt.set_block_format(0, pt.len(), member);

        pt.set_group_common_format(group, Format::list_format(ListStyle::Decimal));
        for i in 0..pt.block_count() {
            let g = pt.block_at(i).block_format().group().expect("in the group");
            assert_eq!(
                pt.group_common_format(g).list_style(),
                Some(ListStyle::Decimal)
            );
        }
    }

    #[test]
    fn block_iteration() {
        let pt = table();
        let cf = pt.default_char_format_index();
        let bf = pt.default_block_format_index();
        pt.insert(0, "onetwo", cf);
        pt.insert_block(3, bf, cf);

        let mut block = pt.block_at(0);
        assert_eq!(block.position(), 0);
        assert_eq!(block.text(), "one");
        assert!(block.next());
        assert_eq!(block.position(), 4);
        assert_eq!(block.text(), "two");
        assert!(!block.next());
        assert!(block.prev());
        assert_eq!(block.index(), 0);

        let found = pt.blocks_find(5);
        assert_eq!(found.index(), 1);
        assert!(found.contains(5));
    }
}
