//! The planning core of an Incremental Font Transfer
//! (<https://w3c.github.io/IFT/Overview.html>) encoder.
//!
//! Given an OpenType font and a list of candidate codepoint/feature segments
//! this computes a glyph segmentation: a partition of the font's glyphs into
//! patches, each guarded by an activation condition over the input segments.
//! For any client subset request the union of the activated patches is
//! guaranteed to be a superset of the font's true glyph closure for that
//! request (the "glyph closure requirement").
//!
//! The main entry point is [`ClosureGlyphSegmenter`]; the produced
//! [`GlyphSegmentation`] is consumed by a patch emitter, and its activation
//! conditions can be lowered into flat patch map entries.
//!
//! Built on top of the read-fonts crate.

#![forbid(unsafe_code)]

mod activation_condition;
mod candidate_merge;
mod closure;
mod error;
mod glyph_closure_cache;
mod glyph_condition_set;
mod glyph_groupings;
mod glyph_keyed_diff;
mod glyph_partition;
mod glyph_segmentation;
mod int_set;
mod merger;
mod patch_map;
mod patch_size_cache;
mod segment;
mod segmentation_context;
mod segmentation_info;
mod segmenter;
mod subset_definition;

#[cfg(test)]
pub(crate) mod testdata;

pub use activation_condition::ActivationCondition;
pub use closure::{FontClosure, GlyphClosure};
pub use error::SegmenterError;
pub use glyph_closure_cache::{GlyphClosureCache, SegmentAnalysis};
pub use glyph_condition_set::{GlyphConditionSet, GlyphConditions};
pub use glyph_groupings::GlyphGroupings;
pub use glyph_keyed_diff::GlyphKeyedDiff;
pub use glyph_partition::GlyphPartition;
pub use glyph_segmentation::GlyphSegmentation;
pub use int_set::{CodepointSet, GlyphSet, IntSet, SegmentSet};
pub use merger::{MergeStrategy, Merger};
pub use patch_map::{Coverage, PatchEncoding, PatchMapEntry};
pub use patch_size_cache::{BrotliPatchSizeCache, EstimatedPatchSizeCache, PatchSizeCache};
pub use segment::{merged_probability, Segment};
pub use segmentation_context::SegmentationContext;
pub use segmentation_info::RequestedSegmentationInfo;
pub use segmenter::ClosureGlyphSegmenter;
pub use subset_definition::{
    add_init_subset_defaults, AxisRange, SubsetDefinition, DEFAULT_FEATURE_TAGS,
};
