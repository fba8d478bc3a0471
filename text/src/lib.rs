//! Rich-text storage for Quill
//!
//! This crate provides the storage engine for rich-text documents: a piece
//! table of formatted fragments grouped into blocks, with interned formats,
//! grouped undo/redo, and cursors that stay valid across edits.
//!
//! The key components are:
//! - [`document::Document`] - The document facade: construction, search,
//!   undo control, change notification
//! - [`piece_table::PieceTable`] - The storage itself: buffer, fragments,
//!   blocks
//! - [`cursor::Cursor`] - Editing positions and selections
//! - [`format::Format`] / [`format_collection::FormatCollection`] - Value
//!   formats and their deduplicating arena
//! - [`fragment::DocumentFragment`] - Detached slices for copy/paste and
//!   serialization
//! - [`html::import`] - Import of pre-parsed HTML node trees

pub mod cursor;
pub mod document;
pub mod format;
pub mod format_collection;
pub mod fragment;
pub mod html;
pub mod piece_table;
pub mod undo;

#[cfg(test)]
pub mod test_helpers;

pub use cursor::{Cursor, MoveMode, MoveOperation};
pub use document::{Document, DocumentEvent, FindFlags, MatchAnchor};
pub use format::{Format, FormatIndex, GroupIndex};
pub use fragment::{DocumentFragment, FragmentCodecError};
pub use html::{HtmlNode, ImportError};
pub use piece_table::{PieceTable, TextBlock};
pub use undo::UndoItem;
