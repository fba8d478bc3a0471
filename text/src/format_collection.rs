//! Format interning and cross-collection transfer
//!
//! A [`FormatCollection`] owns every format a piece table (or a document
//! fragment) references. Interning is by value: equal formats always resolve to
//! the same [`FormatIndex`], and an index stays valid for the collection's whole
//! lifetime (the table never shrinks).
//!
//! [`FormatCollectionState`] implements the copy-and-remap protocol used for
//! cut/copy/paste and fragment deserialization: snapshot the formats actually
//! used by some content, then replay them into a different collection, groups
//! first so the group indices embedded in member formats can be rewritten.

use crate::format::{Format, FormatIndex, GroupIndex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A format group: the shared container format referenced by every member of
/// one list or table.
#[derive(Debug, Clone)]
struct Group {
    common_format: FormatIndex,
}

/// A deduplicating arena of formats plus the group table.
#[derive(Debug, Default)]
pub struct FormatCollection {
    formats: Vec<Format>,
    index_by_value: FxHashMap<Format, FormatIndex>,
    groups: Vec<Group>,
}

impl FormatCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `format`, returning the stable index for its value.
    pub fn index_for_format(&mut self, format: Format) -> FormatIndex {
        if let Some(&idx) = self.index_by_value.get(&format) {
            return idx;
        }
        let idx = FormatIndex(self.formats.len() as u32);
        self.formats.push(format.clone());
        self.index_by_value.insert(format, idx);
        idx
    }

    /// Resolve an index previously returned by this collection.
    ///
    /// Panics on a foreign or corrupted index; callers are required to only use
    /// indices they obtained here or mapped through
    /// [`FormatCollectionState::insert_into`].
    pub fn format(&self, index: FormatIndex) -> &Format {
        assert!(
            (index.0 as usize) < self.formats.len(),
            "format index {} out of range (collection has {} formats)",
            index.0,
            self.formats.len()
        );
        &self.formats[index.0 as usize]
    }

    /// Existence check without interning.
    pub fn has_format_cached(&self, format: &Format) -> bool {
        self.index_by_value.contains_key(format)
    }

    pub fn num_formats(&self) -> usize {
        self.formats.len()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Register a new group whose members share `common_format`.
    pub fn create_group(&mut self, common_format: Format) -> GroupIndex {
        let format_idx = self.index_for_format(common_format);
        let idx = GroupIndex(self.groups.len() as u32);
        self.groups.push(Group {
            common_format: format_idx,
        });
        idx
    }

    /// The interned common format of `group`.
    pub fn group_common_format(&self, group: GroupIndex) -> FormatIndex {
        assert!(
            (group.0 as usize) < self.groups.len(),
            "group index {} out of range (collection has {} groups)",
            group.0,
            self.groups.len()
        );
        self.groups[group.0 as usize].common_format
    }

    /// Replace a group's common format. Every block referencing the group
    /// observes the change without per-block updates.
    pub fn set_group_common_format(&mut self, group: GroupIndex, common_format: Format) {
        assert!(
            (group.0 as usize) < self.groups.len(),
            "group index {} out of range (collection has {} groups)",
            group.0,
            self.groups.len()
        );
        let format_idx = self.index_for_format(common_format);
        self.groups[group.0 as usize].common_format = format_idx;
    }
}

/// A minimal, self-contained snapshot of the formats (and transitively the
/// group common formats) referenced by some content.
///
/// Built against a *source* collection and replayed into a *destination* via
/// [`insert_into`](Self::insert_into). The same type serves same-process
/// copy/paste and fragment serialization, so both share one remapping path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatCollectionState {
    /// Used format indices (in source terms) to their values.
    formats: BTreeMap<FormatIndex, Format>,
    /// Source group index to the source index of its common format.
    groups: BTreeMap<GroupIndex, FormatIndex>,
}

impl FormatCollectionState {
    /// Snapshot the given indices out of `collection`.
    pub fn new(collection: &FormatCollection, used_indices: &[FormatIndex]) -> Self {
        let mut state = Self::default();

        for &idx in used_indices {
            let format = collection.format(idx).clone();

            if let Some(group) = format.group() {
                let common_idx = collection.group_common_format(group);
                state
                    .formats
                    .insert(common_idx, collection.format(common_idx).clone());
                state.groups.insert(group, common_idx);
            }

            state.formats.insert(idx, format);
        }

        state
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Replay this snapshot into `collection`, returning the complete
    /// old-index to new-index mapping.
    ///
    /// Groups are re-created first so that each format referencing one can be
    /// interned with its group field rewritten to the destination's group
    /// index; interning out of order would either fail to dedupe or silently
    /// drop group membership, since group indices take part in format equality.
    pub fn insert_into(
        &self,
        collection: &mut FormatCollection,
    ) -> FxHashMap<FormatIndex, FormatIndex> {
        let mut inserted_groups: FxHashMap<GroupIndex, GroupIndex> = FxHashMap::default();

        for (&old_group, &common_idx) in &self.groups {
            let common_format = self.formats[&common_idx].clone();
            inserted_groups.insert(old_group, collection.create_group(common_format));
        }

        let mut format_index_map = FxHashMap::default();

        for (&old_idx, format) in &self.formats {
            let mut format = format.clone();
            if let Some(group) = format.group() {
                format.set_group(inserted_groups.get(&group).copied());
            }
            format_index_map.insert(old_idx, collection.index_for_format(format));
        }

        format_index_map
    }
}
