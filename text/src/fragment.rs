//! Portable document fragments.
//!
//! A [`DocumentFragment`] is a self-contained slice of rich text: its own
//! character buffer, its own private format collection, and a list of block
//! descriptions. It is the copy/paste and import currency of the crate: built
//! from a cursor selection, from plain text, or by the HTML importer, and
//! inserted into any document by folding its formats into the destination
//! collection first.

use crate::{
    cursor::Cursor,
    format::FormatIndex,
    format_collection::{FormatCollection, FormatCollectionState},
    piece_table::PARAGRAPH_SEPARATOR,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum FragmentCodecError {
    #[snafu(display("failed to encode fragment: {source}"))]
    Encode { source: serde_json::Error },
    #[snafu(display("failed to decode fragment: {source}"))]
    Decode { source: serde_json::Error },
}

/// One run of characters within a fragment block. `format` of `None` means
/// "take the destination cursor's char format" on insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FragmentSpan {
    /// Byte range into the fragment's local buffer.
    position: usize,
    len_bytes: usize,
    format: Option<FormatIndex>,
}

/// One block of a fragment. Blocks with `create_block_upon_insertion` unset
/// merge their spans into the block the cursor sits in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FragmentBlock {
    block_format: Option<FormatIndex>,
    char_format: Option<FormatIndex>,
    create_block_upon_insertion: bool,
    spans: Vec<FragmentSpan>,
}

struct FragmentData {
    local_buffer: String,
    formats: FormatCollection,
    blocks: Vec<FragmentBlock>,
}

/// Wire form of a fragment; `state` carries the referenced formats and their
/// groups so the receiving side can rebuild them.
#[derive(Serialize, Deserialize)]
struct FragmentPayload {
    state: FormatCollectionState,
    local_buffer: String,
    blocks: Vec<FragmentBlock>,
}

/// A detached slice of rich text.
pub struct DocumentFragment {
    d: Option<FragmentData>,
}

impl Default for DocumentFragment {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentFragment {
    /// The empty fragment; inserting it is a no-op.
    pub fn new() -> Self {
        DocumentFragment { d: None }
    }

    pub fn is_empty(&self) -> bool {
        match &self.d {
            None => true,
            Some(d) => d.blocks.iter().all(|b| {
                b.spans.is_empty() && !b.create_block_upon_insertion
            }),
        }
    }

    /// Build a fragment from plain text; `\n` and U+2029 become block
    /// boundaries. Formats stay unset so the destination's formats apply.
    pub fn from_plain_text(text: &str) -> Self {
        if text.is_empty() {
            return Self::new();
        }
        let mut builder = FragmentBuilder::new();
        for (i, span) in text
            .split(|c| c == '\n' || c == PARAGRAPH_SEPARATOR)
            .enumerate()
        {
            if i > 0 {
                builder.append_block(None, None);
            }
            builder.append_text(span, None);
        }
        builder.finish()
    }

    /// Capture the cursor's selection; empty fragment without a selection.
    pub fn from_selection(cursor: &Cursor) -> Self {
        if !cursor.has_selection() {
            return Self::new();
        }
        let start = cursor.selection_start();
        let end = cursor.selection_end();

        cursor.table().with_parts(|state, formats| {
            let (start_block, start_off) = state.locate(start);
            let (end_block, end_off) = state.locate(end);

            // Collect every referenced index, then snapshot those formats and
            // fold the snapshot into the fragment's own collection.
            let mut used: Vec<FormatIndex> = Vec::new();
            for bi in start_block..=end_block {
                let block = &state.blocks[bi];
                used.push(block.block_format);
                used.push(block.char_format);
                for frag in &block.fragments {
                    used.push(frag.format);
                }
            }
            let mut local = FormatCollection::new();
            let map = FormatCollectionState::new(formats, &used).insert_into(&mut local);
            let remap = |idx: FormatIndex| Some(map[&idx]);

            let mut builder = FragmentBuilder {
                data: FragmentData {
                    local_buffer: String::new(),
                    formats: local,
                    blocks: Vec::new(),
                },
            };
            builder.data.blocks.push(FragmentBlock {
                block_format: None,
                char_format: None,
                create_block_upon_insertion: false,
                spans: Vec::new(),
            });

            for bi in start_block..=end_block {
                let block = &state.blocks[bi];
                if bi > start_block {
                    builder.data.blocks.push(FragmentBlock {
                        block_format: remap(block.block_format),
                        char_format: remap(block.char_format),
                        create_block_upon_insertion: true,
                        spans: Vec::new(),
                    });
                }
                let local_from = if bi == start_block { start_off } else { 0 };
                let local_to = if bi == end_block {
                    end_off
                } else {
                    block.len_chars()
                };

                let mut offset = 0;
                for frag in &block.fragments {
                    let frag_end = offset + frag.len_chars();
                    if frag_end > local_from && offset < local_to {
                        let text = frag.text(&state.buffer);
                        let a = char_to_byte(text, local_from.saturating_sub(offset));
                        let b = char_to_byte(text, (local_to - offset).min(frag.len_chars()));
                        builder.push_span(&text[a..b], remap(frag.format));
                    }
                    offset = frag_end;
                    if offset >= local_to {
                        break;
                    }
                }
            }
            builder.finish()
        })
    }

    /// Insert the fragment at the cursor as one undo unit, replacing any
    /// selection. Unset formats resolve to the cursor's current formats.
    pub fn insert(&self, cursor: &mut Cursor) {
        let Some(d) = &self.d else {
            return;
        };

        let table = cursor.table().clone();
        table.begin_edit();
        if cursor.has_selection() {
            cursor.remove_selected_text();
        }

        let map = table.with_formats_mut(|dest| {
            FormatCollectionState::new(&d.formats, &all_indices(d)).insert_into(dest)
        });
        let resolve_char = |f: Option<FormatIndex>, fallback: FormatIndex| {
            f.map(|idx| map[&idx]).unwrap_or(fallback)
        };

        let insertion_char_format = cursor.char_format_index();
        let insertion_block_format = cursor.block_format_index();

        for (i, block) in d.blocks.iter().enumerate() {
            if block.create_block_upon_insertion {
                table.insert_block(
                    cursor.position(),
                    resolve_char(block.block_format, insertion_block_format),
                    resolve_char(block.char_format, insertion_char_format),
                );
            } else if i == 0 {
                // A styled first block restyles the paragraph it merges into.
                if let Some(block_format) = block.block_format {
                    table.set_block_format(cursor.position(), 0, map[&block_format]);
                }
            }
            for span in &block.spans {
                let text = &d.local_buffer[span.position..span.position + span.len_bytes];
                table.insert(
                    cursor.position(),
                    text,
                    resolve_char(span.format, insertion_char_format),
                );
            }
        }

        cursor.set_position(cursor.position(), crate::cursor::MoveMode::MoveAnchor);
        table.end_edit();
    }

    /// The fragment's text with block boundaries rendered as `\n`.
    pub fn to_plain_text(&self) -> String {
        let Some(d) = &self.d else {
            return String::new();
        };
        let mut out = String::new();
        for (i, block) in d.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            for span in &block.spans {
                out.push_str(&d.local_buffer[span.position..span.position + span.len_bytes]);
            }
        }
        out
    }

    /// Serialize for transport between documents or processes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FragmentCodecError> {
        let payload = match &self.d {
            None => FragmentPayload {
                state: FormatCollectionState::default(),
                local_buffer: String::new(),
                blocks: Vec::new(),
            },
            Some(d) => FragmentPayload {
                state: FormatCollectionState::new(&d.formats, &all_indices(d)),
                local_buffer: d.local_buffer.clone(),
                blocks: d.blocks.clone(),
            },
        };
        serde_json::to_vec(&payload).context(EncodeSnafu)
    }

    /// Rebuild a fragment from [`to_bytes`](Self::to_bytes) output. Format
    /// references with no entry in the payload decode as unset.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FragmentCodecError> {
        let payload: FragmentPayload = serde_json::from_slice(bytes).context(DecodeSnafu)?;
        if payload.blocks.is_empty() {
            return Ok(Self::new());
        }

        let mut formats = FormatCollection::new();
        let map = payload.state.insert_into(&mut formats);
        let remap = |f: Option<FormatIndex>| f.and_then(|idx| map.get(&idx).copied());

        let blocks = payload
            .blocks
            .into_iter()
            .map(|b| FragmentBlock {
                block_format: remap(b.block_format),
                char_format: remap(b.char_format),
                create_block_upon_insertion: b.create_block_upon_insertion,
                spans: b
                    .spans
                    .into_iter()
                    .map(|s| FragmentSpan {
                        format: remap(s.format),
                        ..s
                    })
                    .collect(),
            })
            .collect();

        Ok(DocumentFragment {
            d: Some(FragmentData {
                local_buffer: payload.local_buffer,
                formats,
                blocks,
            }),
        })
    }
}

fn all_indices(d: &FragmentData) -> Vec<FormatIndex> {
    let mut used = Vec::new();
    for block in &d.blocks {
        used.extend(block.block_format);
        used.extend(block.char_format);
        for span in &block.spans {
            used.extend(span.format);
        }
    }
    used
}

fn char_to_byte(text: &str, ch: usize) -> usize {
    if ch == 0 {
        return 0;
    }
    text.char_indices()
        .nth(ch)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

/// Incrementally assembles a fragment; used by the HTML importer and the
/// plain-text constructor.
pub(crate) struct FragmentBuilder {
    data: FragmentData,
}

impl FragmentBuilder {
    pub fn new() -> Self {
        // The first block never forces a split: pasting "abc" into the middle
        // of a paragraph must not break it.
        FragmentBuilder {
            data: FragmentData {
                local_buffer: String::new(),
                formats: FormatCollection::new(),
                blocks: vec![FragmentBlock {
                    block_format: None,
                    char_format: None,
                    create_block_upon_insertion: false,
                    spans: Vec::new(),
                }],
            },
        }
    }

    pub fn formats_mut(&mut self) -> &mut FormatCollection {
        &mut self.data.formats
    }

    pub fn append_block(
        &mut self,
        block_format: Option<FormatIndex>,
        char_format: Option<FormatIndex>,
    ) {
        self.data.blocks.push(FragmentBlock {
            block_format,
            char_format,
            create_block_upon_insertion: true,
            spans: Vec::new(),
        });
    }

    /// Restyle the current block without starting a new one. Used when a block
    /// element adopts the block the cursor will land in rather than splitting.
    pub fn update_current_block(
        &mut self,
        block_format: Option<FormatIndex>,
        char_format: Option<FormatIndex>,
    ) {
        let block = self
            .data
            .blocks
            .last_mut()
            .expect("builder always holds at least one block");
        block.block_format = block_format;
        block.char_format = char_format;
    }

    /// Append text to the current block. Must not contain block separators.
    pub fn append_text(&mut self, text: &str, format: Option<FormatIndex>) {
        debug_assert!(
            text.chars().all(|c| c != '\n' && c != PARAGRAPH_SEPARATOR),
            "builder text must not contain separators"
        );
        self.push_span(text, format);
    }

    fn push_span(&mut self, text: &str, format: Option<FormatIndex>) {
        if text.is_empty() {
            return;
        }
        let position = self.data.local_buffer.len();
        self.data.local_buffer.push_str(text);
        let block = self
            .data
            .blocks
            .last_mut()
            .expect("builder always holds at least one block");
        if let Some(last) = block.spans.last_mut() {
            if last.format == format && last.position + last.len_bytes == position {
                last.len_bytes += text.len();
                return;
            }
        }
        block.spans.push(FragmentSpan {
            position,
            len_bytes: text.len(),
            format,
        });
    }

    /// Number of blocks appended so far.
    pub fn block_count(&self) -> usize {
        self.data.blocks.len()
    }

    pub fn finish(self) -> DocumentFragment {
        let empty = self.data.blocks.len() == 1 && self.data.blocks[0].spans.is_empty();
        DocumentFragment {
            d: (!empty).then_some(self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cursor::MoveMode,
        piece_table::PieceTable,
        test_helpers::{bold_format, check_invariants},
    };

    #[test]
    fn empty_fragment_inserts_nothing() {
        let table = PieceTable::new();
        let mut cursor = table.create_cursor(0);
        DocumentFragment::new().insert(&mut cursor);
        assert_eq!(table.len(), 0);
        assert!(!table.is_undo_available());
    }

    #[test]
    fn plain_text_round_trip() {
        let frag = DocumentFragment::from_plain_text("one\ntwo\nthree");
        assert_eq!(frag.to_plain_text(), "one\ntwo\nthree");
        assert!(!frag.is_empty());

        let table = PieceTable::new();
        let mut cursor = table.create_cursor(0);
        frag.insert(&mut cursor);
        assert_eq!(table.block_count(), 3);
        assert_eq!(table.text_between(0, table.len()), "one\ntwo\nthree");
        check_invariants(&table);
    }

    #[test]
    fn copy_paste_preserves_structure_and_formats() {
        let source = PieceTable::new();
        let mut c = source.create_cursor(0);
        c.insert_text("plain ");
        c.insert_text_with_format("bold", source.index_for_format(bold_format()));
        c.insert_text("\nsecond");

        c.set_position(0, MoveMode::MoveAnchor);
        c.set_position(source.len(), MoveMode::KeepAnchor);
        let frag = DocumentFragment::from_selection(&c);

        let dest = PieceTable::new();
        let mut d = dest.create_cursor(0);
        frag.insert(&mut d);

        assert_eq!(dest.block_count(), 2);
        assert_eq!(dest.text_between(0, dest.len()), "plain bold\nsecond");
        let dest_bold = dest.index_for_format(bold_format());
        assert_eq!(
            dest.block_at(0).fragments()[1],
            ("bold".to_owned(), dest_bold)
        );
        check_invariants(&dest);
    }

    #[test]
    fn partial_selection_pastes_inline() {
        let source = PieceTable::new();
        let mut c = source.create_cursor(0);
        c.insert_text("hello world");
        c.set_position(6, MoveMode::MoveAnchor);
        c.set_position(11, MoveMode::KeepAnchor);
        let frag = DocumentFragment::from_selection(&c);
        assert_eq!(frag.to_plain_text(), "world");

        let dest = PieceTable::new();
        let mut d = dest.create_cursor(0);
        d.insert_text("ab");
        d.set_position(1, MoveMode::MoveAnchor);
        frag.insert(&mut d);
        // No block split: the first fragment block merges into the paragraph.
        assert_eq!(dest.block_count(), 1);
        assert_eq!(dest.text_between(0, 7), "aworldb");
    }

    #[test]
    fn insert_is_one_undo_unit_and_replaces_selection() {
        let table = PieceTable::new();
        let mut cursor = table.create_cursor(0);
        cursor.insert_text("abcdef");
        cursor.set_position(1, MoveMode::MoveAnchor);
        cursor.set_position(5, MoveMode::KeepAnchor);

        DocumentFragment::from_plain_text("X\nY").insert(&mut cursor);
        assert_eq!(table.text_between(0, table.len()), "aX\nYf");

        table.undo();
        assert_eq!(table.text_between(0, 6), "abcdef");
        assert_eq!(table.block_count(), 1);
        check_invariants(&table);
    }

    #[test]
    fn no_selection_yields_empty_fragment() {
        let table = PieceTable::new();
        let mut c = table.create_cursor(0);
        c.insert_text("text");
        let frag = DocumentFragment::from_selection(&c);
        assert!(frag.is_empty());
        assert_eq!(frag.to_plain_text(), "");
    }

    #[test]
    fn serialization_round_trips_formats() {
        let source = PieceTable::new();
        let mut c = source.create_cursor(0);
        c.insert_text_with_format("bold", source.index_for_format(bold_format()));
        c.insert_text("\nplain");
        c.set_position(0, MoveMode::MoveAnchor);
        c.set_position(source.len(), MoveMode::KeepAnchor);

        let bytes = DocumentFragment::from_selection(&c).to_bytes().unwrap();
        let decoded = DocumentFragment::from_bytes(&bytes).unwrap();

        let dest = PieceTable::new();
        let mut d = dest.create_cursor(0);
        decoded.insert(&mut d);
        assert_eq!(dest.text_between(0, dest.len()), "bold\nplain");
        let dest_bold = dest.index_for_format(bold_format());
        assert_eq!(
            dest.block_at(0).fragments(),
            vec![("bold".to_owned(), dest_bold)]
        );
        check_invariants(&dest);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(DocumentFragment::from_bytes(b"not json").is_err());
    }
}
