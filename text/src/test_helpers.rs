//! Test helpers to reduce boilerplate in tests

use crate::{
    cursor::Cursor,
    format::{Format, PropertyKey, PropertyValue},
    piece_table::PieceTable,
};

/// Create a table seeded with `text`; `\n` splits blocks.
pub fn simple_table(text: &str) -> PieceTable {
    let table = PieceTable::new();
    let mut cursor = table.create_cursor(0);
    cursor.insert_text(text);
    table
}

/// Create a table plus a cursor positioned at `pos`.
pub fn table_with_cursor_at(text: &str, pos: usize) -> (PieceTable, Cursor) {
    let table = simple_table(text);
    let cursor = table.create_cursor(pos);
    (table, cursor)
}

/// A bold char format, the workhorse of formatting tests.
pub fn bold_format() -> Format {
    let mut f = Format::char_format();
    f.set(PropertyKey::FontWeight, PropertyValue::Int(700));
    f
}

/// Flatten a block's runs to `(text, format index)` pairs for assertions.
pub fn fragment_texts(table: &PieceTable, block: usize) -> Vec<String> {
    table
        .block_at(block)
        .fragments()
        .into_iter()
        .map(|(text, _)| text)
        .collect()
}

/// Verify the structural invariants of a table.
///
/// Checks that every fragment addresses a valid UTF-8 range of the buffer with
/// consistent byte/char bookkeeping, that every referenced format exists, and
/// that the document length adds up from block contents plus separators.
pub fn check_invariants(table: &PieceTable) {
    table.with_parts(|state, formats| {
        assert!(!state.blocks.is_empty(), "a table always holds one block");

        let mut content_chars = 0;
        for (bi, block) in state.blocks.iter().enumerate() {
            assert!(
                (block.block_format.0 as usize) < formats.num_formats(),
                "block {bi} references a missing block format"
            );
            assert!(
                (block.char_format.0 as usize) < formats.num_formats(),
                "block {bi} references a missing char format"
            );

            for (fi, fragment) in block.fragments.iter().enumerate() {
                assert!(
                    (fragment.format.0 as usize) < formats.num_formats(),
                    "fragment {fi} of block {bi} references a missing format"
                );
                let text = fragment.text(&state.buffer);
                assert_eq!(
                    text.chars().count(),
                    fragment.len_chars(),
                    "fragment {fi} of block {bi} has inconsistent char count"
                );
                assert!(
                    !text.is_empty(),
                    "fragment {fi} of block {bi} is empty"
                );
            }
            content_chars += block.len_chars();
        }

        assert_eq!(
            state.len_chars(),
            content_chars + state.blocks.len() - 1,
            "length must equal content plus separators"
        );
    });
}
