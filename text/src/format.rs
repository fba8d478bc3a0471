//! Format value types
//!
//! A [`Format`] is an immutable bag of display/structural properties: a kind tag,
//! an ordered property map, and an optional group reference for formats that take
//! part in a shared container (list, table). Formats are plain values; code outside
//! [`crate::format_collection::FormatCollection`] only ever holds the small
//! [`FormatIndex`] / [`GroupIndex`] handles obtained by interning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Handle to an interned format within one specific
/// [`crate::format_collection::FormatCollection`].
///
/// Indices are only meaningful relative to the collection that produced them;
/// cross-collection transfer goes through
/// [`crate::format_collection::FormatCollectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatIndex(pub u32);

/// Handle to a format group (a shared container format) within one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupIndex(pub u32);

/// What a format describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormatKind {
    Char,
    Block,
    List,
    Table,
    Frame,
    Image,
}

/// Property keys, ordered so the property map has a stable iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    FontFamily,
    FontPointSize,
    FontWeight,
    FontItalic,
    FontUnderline,
    FontStrikeOut,
    FontFixedPitch,
    Foreground,
    Background,
    Alignment,
    TopMargin,
    BottomMargin,
    LeftMargin,
    RightMargin,
    FirstLineMargin,
    Indent,
    NonBreakableLines,
    NonDeletable,
    ListStyle,
    Anchor,
    AnchorHref,
    AnchorName,
    FloatPosition,
    TableCellEndOfRow,
    ImageName,
    ImageWidth,
    ImageHeight,
}

/// An RGBA color property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// Horizontal block alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alignment {
    #[default]
    Left,
    Right,
    Center,
    Justify,
}

/// Visual style of a list group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListStyle {
    #[default]
    Disc,
    Circle,
    Square,
    Decimal,
    LowerAlpha,
    UpperAlpha,
}

/// CSS-style float position for blocks and images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatPosition {
    #[default]
    None,
    Left,
    Right,
}

/// A single property value.
///
/// Floats compare and hash by bit pattern so [`Format`] can be a map key in the
/// interning table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Color(Color),
    Alignment(Alignment),
    ListStyle(ListStyle),
    FloatPosition(FloatPosition),
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        use PropertyValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Color(a), Color(b)) => a == b,
            (Alignment(a), Alignment(b)) => a == b,
            (ListStyle(a), ListStyle(b)) => a == b,
            (FloatPosition(a), FloatPosition(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use PropertyValue::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Bool(v) => v.hash(state),
            Int(v) => v.hash(state),
            Float(v) => v.to_bits().hash(state),
            String(v) => v.hash(state),
            Color(v) => v.hash(state),
            Alignment(v) => v.hash(state),
            ListStyle(v) => v.hash(state),
            FloatPosition(v) => v.hash(state),
        }
    }
}

/// An immutable format: kind + property map + optional group membership.
///
/// Two formats are equal iff all three parts are equal; equality, not identity,
/// drives interning. The group index field takes part in equality, which is why
/// cross-collection transfer has to re-create groups before re-interning the
/// formats that reference them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    kind: FormatKind,
    properties: BTreeMap<PropertyKey, PropertyValue>,
    group: Option<GroupIndex>,
}

impl Format {
    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
            group: None,
        }
    }

    /// An empty character format.
    pub fn char_format() -> Self {
        Self::new(FormatKind::Char)
    }

    /// An empty block (paragraph) format.
    pub fn block_format() -> Self {
        Self::new(FormatKind::Block)
    }

    /// A list container format with the given style.
    pub fn list_format(style: ListStyle) -> Self {
        let mut f = Self::new(FormatKind::List);
        f.set(PropertyKey::ListStyle, PropertyValue::ListStyle(style));
        f
    }

    /// An empty table container format.
    pub fn table_format() -> Self {
        Self::new(FormatKind::Table)
    }

    /// An image format naming its source.
    pub fn image_format(name: &str) -> Self {
        let mut f = Self::new(FormatKind::Image);
        f.set(
            PropertyKey::ImageName,
            PropertyValue::String(name.to_owned()),
        );
        f
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn group(&self) -> Option<GroupIndex> {
        self.group
    }

    pub fn set_group(&mut self, group: Option<GroupIndex>) {
        self.group = group;
    }

    pub fn with_group(mut self, group: GroupIndex) -> Self {
        self.group = Some(group);
        self
    }

    /// Set a raw property.
    pub fn set(&mut self, key: PropertyKey, value: PropertyValue) {
        self.properties.insert(key, value);
    }

    /// Get a raw property.
    pub fn get(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.properties.get(&key)
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    // Typed accessors for the properties the engine itself consults. The HTML
    // importer and embedding applications set the rest through `set`.

    pub fn bool_property(&self, key: PropertyKey) -> bool {
        matches!(self.get(key), Some(PropertyValue::Bool(true)))
    }

    pub fn int_property(&self, key: PropertyKey) -> Option<i64> {
        match self.get(key) {
            Some(PropertyValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float_property(&self, key: PropertyKey) -> Option<f64> {
        match self.get(key) {
            Some(PropertyValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string_property(&self, key: PropertyKey) -> Option<&str> {
        match self.get(key) {
            Some(PropertyValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn list_style(&self) -> Option<ListStyle> {
        match self.get(PropertyKey::ListStyle) {
            Some(PropertyValue::ListStyle(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn alignment(&self) -> Alignment {
        match self.get(PropertyKey::Alignment) {
            Some(PropertyValue::Alignment(v)) => *v,
            _ => Alignment::default(),
        }
    }

    pub fn non_deletable(&self) -> bool {
        self.bool_property(PropertyKey::NonDeletable)
    }

    pub fn table_cell_end_of_row(&self) -> bool {
        self.bool_property(PropertyKey::TableCellEndOfRow)
    }
}
