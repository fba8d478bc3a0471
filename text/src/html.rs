//! HTML import.
//!
//! Converts a pre-parsed tree of [`HtmlNode`]s (a flat array where each node
//! names its parent) into a [`DocumentFragment`]. The importer tracks open
//! lists and tables on explicit stacks and closes them when the node walk
//! leaves their subtree, so sibling structures at different depths resolve to
//! the right group memberships.
//!
//! Parsing markup into nodes is out of scope here; the input contract is the
//! flat parent-indexed array.

use crate::{
    format::{
        Alignment, Color, Format, FormatIndex, GroupIndex, ListStyle, PropertyKey, PropertyValue,
    },
    fragment::{DocumentFragment, FragmentBuilder},
    piece_table::PARAGRAPH_SEPARATOR,
};
use smallvec::SmallVec;
use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
pub enum ImportError {
    /// A node references a parent at or after itself.
    #[snafu(display("malformed node tree: node {index} has parent {parent}"))]
    MalformedTree { index: usize, parent: usize },
    /// A `<td>`/`<th>` appeared with no open table.
    #[snafu(display("table cell at node {index} outside any table"))]
    TableCellOutsideTable { index: usize },
    /// An `<li>` appeared with no open list.
    #[snafu(display("list item at node {index} outside any list"))]
    ListItemOutsideList { index: usize },
}

/// One element or text run of a parsed HTML document.
///
/// `parent` is the index of the enclosing node; node 0 is the synthetic root
/// with `parent == 0`. Inline style fields are `None` when the markup does not
/// set them.
#[derive(Debug, Clone, Default)]
pub struct HtmlNode {
    pub tag: String,
    pub parent: usize,
    pub is_block: bool,
    pub is_list_start: bool,
    pub is_list_item: bool,
    pub is_table: bool,
    pub is_table_cell: bool,
    pub is_table_row_end: bool,
    pub is_anchor: bool,
    pub is_image: bool,
    pub preformatted: bool,

    pub text: String,

    pub font_family: Option<String>,
    pub font_point_size: Option<f64>,
    pub font_weight: Option<i64>,
    pub font_italic: Option<bool>,
    pub font_underline: Option<bool>,
    pub color: Option<Color>,
    pub background: Option<Color>,
    pub alignment: Option<Alignment>,
    pub list_style: Option<ListStyle>,
    pub top_margin: Option<f64>,
    pub bottom_margin: Option<f64>,
    pub anchor_href: Option<String>,
    pub anchor_name: Option<String>,
    pub image_name: Option<String>,
    pub image_width: Option<f64>,
    pub image_height: Option<f64>,
}

/// Import a node array into a detached fragment.
///
/// On any error no content is produced.
pub fn import(nodes: &[HtmlNode]) -> Result<DocumentFragment, ImportError> {
    Importer::new(nodes).run()
}

struct Importer<'a> {
    nodes: &'a [HtmlNode],
    builder: FragmentBuilder,
    /// Whether the current output block is still empty of content.
    has_block: bool,
    indent: usize,
    /// Open lists/tables, each tagged with the node index that opened it.
    list_references: SmallVec<[(usize, GroupIndex); 4]>,
    table_indices: SmallVec<[(usize, GroupIndex); 2]>,
}

impl<'a> Importer<'a> {
    fn new(nodes: &'a [HtmlNode]) -> Self {
        Importer {
            nodes,
            builder: FragmentBuilder::new(),
            has_block: true,
            indent: 0,
            list_references: SmallVec::new(),
            table_indices: SmallVec::new(),
        }
    }

    fn run(mut self) -> Result<DocumentFragment, ImportError> {
        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];
            ensure!(
                index == 0 || node.parent < index,
                MalformedTreeSnafu {
                    index,
                    parent: node.parent
                }
            );

            self.close_left_structures(index);
            self.process_node(index)?;
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            blocks = self.builder.block_count(),
            "html import"
        );
        Ok(self.builder.finish())
    }

    fn process_node(&mut self, index: usize) -> Result<(), ImportError> {
        let node = &self.nodes[index];

        if node.is_list_start {
            self.indent += 1;
            let style = node
                .list_style
                .unwrap_or(if self.indent % 2 == 0 { ListStyle::Circle } else { ListStyle::Disc });
            let mut list_format = Format::list_format(style);
            list_format.set(
                PropertyKey::Indent,
                PropertyValue::Int(self.indent as i64),
            );
            let group = self.builder.formats_mut().create_group(list_format);
            self.list_references.push((index, group));
        } else if node.is_table {
            let group = self.builder.formats_mut().create_group(Format::table_format());
            self.table_indices.push((index, group));
        }

        if node.is_list_item {
            ensure!(!self.list_references.is_empty(), ListItemOutsideListSnafu { index });
            let (_, group) = *self.list_references.last().expect("checked non-empty");
            let block_format = self.block_format_for(node).with_group(group);
            self.append_block(block_format, node);
        } else if node.is_table_cell {
            ensure!(!self.table_indices.is_empty(), TableCellOutsideTableSnafu { index });
            let (_, group) = *self.table_indices.last().expect("checked non-empty");
            let block_format = self.block_format_for(node).with_group(group);
            self.append_block(block_format, node);
        } else if node.is_block {
            let block_format = self.block_format_for(node);
            self.append_block(block_format, node);
        }

        if node.is_image {
            let mut image = Format::image_format(node.image_name.as_deref().unwrap_or(""));
            if let Some(w) = node.image_width {
                image.set(PropertyKey::ImageWidth, PropertyValue::Float(w));
            }
            if let Some(h) = node.image_height {
                image.set(PropertyKey::ImageHeight, PropertyValue::Float(h));
            }
            let idx = self.builder.formats_mut().index_for_format(image);
            // The object replacement character stands in for the image.
            self.builder.append_text("\u{fffc}", Some(idx));
            self.has_block = false;
        }

        if !node.text.is_empty() {
            let char_format = self.char_format_for(index);
            let idx = self.builder.formats_mut().index_for_format(char_format);
            self.append_text_runs(index, idx);
        }

        Ok(())
    }

    /// Append text, turning embedded newlines into block boundaries for
    /// preformatted content and whitespace runs into single spaces otherwise.
    fn append_text_runs(&mut self, index: usize, format: FormatIndex) {
        let node = &self.nodes[index];
        if node.preformatted {
            let block_format = self.block_format_for(node);
            for (i, line) in node
                .text
                .split(|c| c == '\n' || c == PARAGRAPH_SEPARATOR)
                .enumerate()
            {
                if i > 0 {
                    let idx = self.builder.formats_mut().index_for_format(block_format.clone());
                    self.builder.append_block(Some(idx), None);
                }
                self.builder.append_text(line, Some(format));
            }
        } else {
            let collapsed = collapse_whitespace(&node.text);
            self.builder.append_text(&collapsed, Some(format));
        }
        if !node.text.is_empty() {
            self.has_block = false;
        }
    }

    fn append_block(&mut self, block_format: Format, node: &HtmlNode) {
        let block_idx = self.builder.formats_mut().index_for_format(block_format);
        let char_idx = {
            let char_format = self.char_format_for_node(node);
            self.builder.formats_mut().index_for_format(char_format)
        };
        if self.has_block {
            // The current block holds no content yet; adopt it instead of
            // emitting an empty paragraph.
            self.builder.update_current_block(Some(block_idx), Some(char_idx));
        } else {
            self.builder.append_block(Some(block_idx), Some(char_idx));
        }
        self.has_block = true;
    }

    fn block_format_for(&self, node: &HtmlNode) -> Format {
        let mut format = Format::block_format();
        if let Some(alignment) = node.alignment {
            format.set(PropertyKey::Alignment, PropertyValue::Alignment(alignment));
        }
        if let Some(margin) = node.top_margin {
            format.set(PropertyKey::TopMargin, PropertyValue::Float(margin));
        }
        if let Some(margin) = node.bottom_margin {
            format.set(PropertyKey::BottomMargin, PropertyValue::Float(margin));
        }
        if let Some(color) = node.background {
            format.set(PropertyKey::Background, PropertyValue::Color(color));
        }
        if node.is_table_cell && node.is_table_row_end {
            format.set(PropertyKey::TableCellEndOfRow, PropertyValue::Bool(true));
        }
        format
    }

    /// Char format for a text node: inline properties accumulated along the
    /// parent chain, nearest ancestor winning.
    fn char_format_for(&self, index: usize) -> Format {
        let mut chain: SmallVec<[usize; 8]> = SmallVec::new();
        let mut at = index;
        loop {
            chain.push(at);
            if at == 0 {
                break;
            }
            at = self.nodes[at].parent;
        }

        let mut format = Format::char_format();
        for &i in chain.iter().rev() {
            apply_char_properties(&mut format, &self.nodes[i]);
        }
        format
    }

    fn char_format_for_node(&self, node: &HtmlNode) -> Format {
        let mut format = Format::char_format();
        apply_char_properties(&mut format, node);
        format
    }

    /// Pop every open list/table whose opening node is not an ancestor of
    /// `index`; the walk has left its subtree.
    fn close_left_structures(&mut self, index: usize) {
        let mut ancestors: SmallVec<[usize; 8]> = SmallVec::new();
        let mut at = index;
        while at != 0 {
            at = self.nodes[at].parent;
            ancestors.push(at);
        }

        while let Some(&(opener, _)) = self.list_references.last() {
            if ancestors.contains(&opener) {
                break;
            }
            self.list_references.pop();
            self.indent = self.indent.saturating_sub(1);
        }
        while let Some(&(opener, _)) = self.table_indices.last() {
            if ancestors.contains(&opener) {
                break;
            }
            self.table_indices.pop();
        }
    }
}

fn apply_char_properties(format: &mut Format, node: &HtmlNode) {
    if let Some(family) = &node.font_family {
        format.set(PropertyKey::FontFamily, PropertyValue::String(family.clone()));
    }
    if let Some(size) = node.font_point_size {
        format.set(PropertyKey::FontPointSize, PropertyValue::Float(size));
    }
    if let Some(weight) = node.font_weight {
        format.set(PropertyKey::FontWeight, PropertyValue::Int(weight));
    }
    if let Some(italic) = node.font_italic {
        format.set(PropertyKey::FontItalic, PropertyValue::Bool(italic));
    }
    if let Some(underline) = node.font_underline {
        format.set(PropertyKey::FontUnderline, PropertyValue::Bool(underline));
    }
    if let Some(color) = node.color {
        format.set(PropertyKey::Foreground, PropertyValue::Color(color));
    }
    if node.is_anchor {
        format.set(PropertyKey::Anchor, PropertyValue::Bool(true));
        if let Some(href) = &node.anchor_href {
            format.set(PropertyKey::AnchorHref, PropertyValue::String(href.clone()));
        }
        if let Some(name) = &node.anchor_name {
            format.set(PropertyKey::AnchorName, PropertyValue::String(name.clone()));
        }
        format.set(PropertyKey::FontUnderline, PropertyValue::Bool(true));
    }
}

/// Collapse runs of HTML whitespace to single spaces.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format::GroupIndex, piece_table::PieceTable, test_helpers::check_invariants};

    fn root() -> HtmlNode {
        HtmlNode {
            tag: "html".into(),
            ..Default::default()
        }
    }

    fn text_node(parent: usize, text: &str) -> HtmlNode {
        HtmlNode {
            parent,
            text: text.into(),
            ..Default::default()
        }
    }

    fn paste(nodes: &[HtmlNode]) -> PieceTable {
        let fragment = import(nodes).expect("import succeeds");
        let table = PieceTable::new();
        let mut cursor = table.create_cursor(0);
        fragment.insert(&mut cursor);
        check_invariants(&table);
        table
    }

    #[test]
    fn plain_text_run() {
        let nodes = vec![root(), text_node(0, "hello world")];
        let table = paste(&nodes);
        assert_eq!(table.block_count(), 1);
        assert_eq!(table.text_between(0, table.len()), "hello world");
    }

    #[test]
    fn paragraphs_become_blocks() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "p".into(),
                parent: 0,
                is_block: true,
                ..Default::default()
            },
            text_node(1, "first"),
            HtmlNode {
                tag: "p".into(),
                parent: 0,
                is_block: true,
                ..Default::default()
            },
            text_node(3, "second"),
        ];
        let table = paste(&nodes);
        assert_eq!(table.text_between(0, table.len()), "first\nsecond");
    }

    #[test]
    fn bold_span_carries_weight() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "b".into(),
                parent: 0,
                font_weight: Some(700),
                ..Default::default()
            },
            text_node(1, "bold"),
        ];
        let table = paste(&nodes);
        let (text, format) = table.block_at(0).fragments()[0].clone();
        assert_eq!(text, "bold");
        assert_eq!(
            table.format(format).int_property(PropertyKey::FontWeight),
            Some(700)
        );
    }

    #[test]
    fn nested_inline_styles_accumulate() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "b".into(),
                parent: 0,
                font_weight: Some(700),
                ..Default::default()
            },
            HtmlNode {
                tag: "i".into(),
                parent: 1,
                font_italic: Some(true),
                ..Default::default()
            },
            text_node(2, "both"),
        ];
        let table = paste(&nodes);
        let (_, format) = table.block_at(0).fragments()[0].clone();
        let format = table.format(format);
        assert_eq!(format.int_property(PropertyKey::FontWeight), Some(700));
        assert!(format.bool_property(PropertyKey::FontItalic));
    }

    #[test]
    fn list_items_share_one_group() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "ul".into(),
                parent: 0,
                is_list_start: true,
                ..Default::default()
            },
            HtmlNode {
                tag: "li".into(),
                parent: 1,
                is_list_item: true,
                is_block: true,
                ..Default::default()
            },
            text_node(2, "one"),
            HtmlNode {
                tag: "li".into(),
                parent: 1,
                is_list_item: true,
                is_block: true,
                ..Default::default()
            },
            text_node(4, "two"),
        ];
        let table = paste(&nodes);
        assert_eq!(table.text_between(0, table.len()), "one\ntwo");
        assert_eq!(table.block_count(), 2);

        let groups: Vec<Option<GroupIndex>> = (0..table.block_count())
            .map(|i| table.block_at(i).block_format().group())
            .collect();
        assert!(groups[0].is_some(), "list items carry a group");
        assert_eq!(groups[0], groups[1], "siblings share the group");

        let group = groups[0].unwrap();
        let common = table.group_common_format(group);
        assert_eq!(common.list_style(), Some(ListStyle::Disc));
    }

    #[test]
    fn sibling_lists_get_distinct_groups() {
        let li = |parent| HtmlNode {
            tag: "li".into(),
            parent,
            is_list_item: true,
            is_block: true,
            ..Default::default()
        };
        let ul = || HtmlNode {
            tag: "ul".into(),
            parent: 0,
            is_list_start: true,
            ..Default::default()
        };
        let nodes = vec![
            root(),
            ul(),
            li(1),
            text_node(2, "a"),
            ul(),
            li(4),
            text_node(5, "b"),
        ];
        // Walking from node 3 to node 4 leaves the first list.
        let table = paste(&nodes);
        let g1 = table.block_at(0).block_format().group();
        let g2 = table.block_at(1).block_format().group();
        assert!(g1.is_some() && g2.is_some());
        assert_ne!(g1, g2);
    }

    #[test]
    fn table_cells_share_the_table_group() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "table".into(),
                parent: 0,
                is_table: true,
                ..Default::default()
            },
            HtmlNode {
                tag: "td".into(),
                parent: 1,
                is_table_cell: true,
                is_block: true,
                ..Default::default()
            },
            text_node(2, "c1"),
            HtmlNode {
                tag: "td".into(),
                parent: 1,
                is_table_cell: true,
                is_block: true,
                is_table_row_end: true,
                ..Default::default()
            },
            text_node(4, "c2"),
        ];
        let table = paste(&nodes);
        let g1 = table.block_at(0).block_format().group();
        let g2 = table.block_at(1).block_format().group();
        assert!(g1.is_some());
        assert_eq!(g1, g2);
        assert!(table.block_at(1).block_format().table_cell_end_of_row());
    }

    #[test]
    fn list_item_outside_list_is_an_error() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "li".into(),
                parent: 0,
                is_list_item: true,
                is_block: true,
                ..Default::default()
            },
        ];
        assert!(matches!(
            import(&nodes),
            Err(ImportError::ListItemOutsideList { index: 1 })
        ));
    }

    #[test]
    fn cell_outside_table_is_an_error() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "td".into(),
                parent: 0,
                is_table_cell: true,
                is_block: true,
                ..Default::default()
            },
        ];
        assert!(matches!(
            import(&nodes),
            Err(ImportError::TableCellOutsideTable { index: 1 })
        ));
    }

    #[test]
    fn forward_parent_reference_is_an_error() {
        let nodes = vec![root(), HtmlNode {
            parent: 5,
            ..Default::default()
        }];
        assert!(matches!(
            import(&nodes),
            Err(ImportError::MalformedTree { index: 1, parent: 5 })
        ));
    }

    #[test]
    fn whitespace_collapses_outside_pre() {
        let nodes = vec![root(), text_node(0, "a   b\n c")];
        let table = paste(&nodes);
        assert_eq!(table.text_between(0, table.len()), "a b c");
    }

    #[test]
    fn preformatted_text_keeps_newlines() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "pre".into(),
                parent: 0,
                is_block: true,
                preformatted: true,
                text: "line1\nline2".into(),
                ..Default::default()
            },
        ];
        let table = paste(&nodes);
        assert_eq!(table.text_between(0, table.len()), "line1\nline2");
        assert_eq!(table.block_count(), 2);
    }

    #[test]
    fn anchors_are_underlined_with_href() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "a".into(),
                parent: 0,
                is_anchor: true,
                anchor_href: Some("https://example.com".into()),
                ..Default::default()
            },
            text_node(1, "link"),
        ];
        let table = paste(&nodes);
        let (_, format) = table.block_at(0).fragments()[0].clone();
        let format = table.format(format);
        assert!(format.bool_property(PropertyKey::Anchor));
        assert!(format.bool_property(PropertyKey::FontUnderline));
        assert_eq!(
            format.string_property(PropertyKey::AnchorHref),
            Some("https://example.com")
        );
    }

    #[test]
    fn image_inserts_object_replacement() {
        let nodes = vec![
            root(),
            HtmlNode {
                tag: "img".into(),
                parent: 0,
                is_image: true,
                image_name: Some("pic.png".into()),
                image_width: Some(32.0),
                ..Default::default()
            },
        ];
        let table = paste(&nodes);
        let (text, format) = table.block_at(0).fragments()[0].clone();
        assert_eq!(text, "\u{fffc}");
        let format = table.format(format);
        assert_eq!(format.string_property(PropertyKey::ImageName), Some("pic.png"));
        assert_eq!(format.float_property(PropertyKey::ImageWidth), Some(32.0));
    }

    #[test]
    fn empty_input_produces_empty_fragment() {
        let fragment = import(&[]).expect("empty import succeeds");
        assert!(fragment.is_empty());
    }
}
