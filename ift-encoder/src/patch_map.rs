//! Flat patch map entries produced by lowering activation conditions.
//!
//! This mirrors the entry layout of the IFT patch map format 2
//! (<https://w3c.github.io/IFT/Overview.html#patch-map-format-2>): each entry
//! either carries a subset definition directly or references previously
//! emitted entries by index, joined conjunctively or disjunctively.

use std::collections::BTreeSet;

use font_types::Tag;

use crate::int_set::{CodepointSet, IntSet};

/// How the patch activated by an entry is encoded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PatchEncoding {
    #[default]
    GlyphKeyed,
    TableKeyedFull,
    TableKeyedPartial,
}

/// What input coverage triggers an entry.
///
/// Either `codepoints`/`features` are populated, or `child_indices` references
/// earlier entries which are combined conjunctively or disjunctively.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coverage {
    pub codepoints: CodepointSet,
    pub features: BTreeSet<Tag>,
    pub child_indices: IntSet,
    pub conjunctive: bool,
}

impl Coverage {
    pub fn from_codepoints(codepoints: CodepointSet) -> Coverage {
        Coverage {
            codepoints,
            ..Default::default()
        }
    }

    pub fn from_features<I: IntoIterator<Item = Tag>>(features: I) -> Coverage {
        Coverage {
            features: features.into_iter().collect(),
            ..Default::default()
        }
    }
}

/// One entry of the lowered patch map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchMapEntry {
    pub coverage: Coverage,
    pub encoding: PatchEncoding,
    pub patch_indices: Vec<u32>,
    pub ignored: bool,
}

impl PatchMapEntry {
    pub fn new(coverage: Coverage, patch_index: u32, encoding: PatchEncoding) -> PatchMapEntry {
        PatchMapEntry {
            coverage,
            encoding,
            patch_indices: vec![patch_index],
            ignored: false,
        }
    }
}
