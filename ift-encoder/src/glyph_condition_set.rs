//! Per glyph activation conditions derived from closure analysis.

use fnv::FnvHashMap;

use crate::int_set::{GlyphSet, SegmentSet};

/// The set of segments which activate a specific single glyph.
///
/// A glyph with a single AND segment is exclusive to that segment. A glyph
/// with multiple AND segments is required only when all of them are present.
/// OR segments activate the glyph disjunctively. Both sets may be non-empty at
/// the same time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlyphConditions {
    pub and_segments: SegmentSet,
    pub or_segments: SegmentSet,
}

impl GlyphConditions {
    pub fn is_empty(&self) -> bool {
        self.and_segments.is_empty() && self.or_segments.is_empty()
    }

    fn remove_segments(&mut self, segments: &SegmentSet) {
        self.and_segments.subtract(segments);
        self.or_segments.subtract(segments);
    }
}

/// Collection of per glyph conditions for all glyphs in a font.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlyphConditionSet {
    // Index in this vector is the glyph id associated with the condition at
    // that index.
    gid_conditions: Vec<GlyphConditions>,

    // For each segment, the set of glyphs which include that segment in their
    // conditions.
    segment_to_gid_conditions: FnvHashMap<u32, GlyphSet>,
}

impl GlyphConditionSet {
    pub fn new(num_glyphs: u32) -> GlyphConditionSet {
        GlyphConditionSet {
            gid_conditions: vec![GlyphConditions::default(); num_glyphs as usize],
            segment_to_gid_conditions: Default::default(),
        }
    }

    pub fn conditions_for(&self, gid: u32) -> &GlyphConditions {
        &self.gid_conditions[gid as usize]
    }

    pub fn add_and_condition(&mut self, gid: u32, segment: u32) {
        self.gid_conditions[gid as usize].and_segments.insert(segment);
        self.segment_to_gid_conditions
            .entry(segment)
            .or_default()
            .insert(gid);
    }

    pub fn add_or_condition(&mut self, gid: u32, segment: u32) {
        self.gid_conditions[gid as usize].or_segments.insert(segment);
        self.segment_to_gid_conditions
            .entry(segment)
            .or_default()
            .insert(gid);
    }

    /// Returns the set of glyphs that have `segment` in their conditions.
    pub fn glyphs_with_segment(&self, segment: u32) -> GlyphSet {
        self.segment_to_gid_conditions
            .get(&segment)
            .cloned()
            .unwrap_or_default()
    }

    /// Clears out any stored information for the given glyphs and segments so
    /// it can be recalculated.
    pub fn invalidate(&mut self, glyphs: &GlyphSet, segments: &SegmentSet) {
        for gid in glyphs.iter() {
            self.gid_conditions[gid as usize].remove_segments(segments);
        }

        for segment in segments.iter() {
            if let Some(gids) = self.segment_to_gid_conditions.get_mut(&segment) {
                gids.subtract(glyphs);
                // Emptied entries are dropped so that equality against a
                // freshly computed condition set stays structural.
                if gids.is_empty() {
                    self.segment_to_gid_conditions.remove(&segment);
                }
            }
        }
    }
}
