//! Basic information about the configuration of a requested segmentation.

use std::collections::BTreeSet;

use font_types::Tag;

use crate::error::SegmenterError;
use crate::glyph_closure_cache::GlyphClosureCache;
use crate::int_set::{CodepointSet, GlyphSet, SegmentSet};
use crate::segment::Segment;
use crate::subset_definition::{add_init_subset_defaults, SubsetDefinition};

/// The ordered segment list plus the initial font subset, with cached
/// closures of the initial subset and of the union of everything.
pub struct RequestedSegmentationInfo {
    segments: Vec<Segment>,
    init_font_segment: SubsetDefinition,
    full_definition: SubsetDefinition,
    init_font_glyphs: GlyphSet,
    full_closure: GlyphSet,
    segments_are_disjoint: bool,
}

impl RequestedSegmentationInfo {
    pub fn new(
        segments: Vec<Segment>,
        init_font_segment: SubsetDefinition,
        closure_cache: &mut GlyphClosureCache,
    ) -> Result<RequestedSegmentationInfo, SegmenterError> {
        let mut info = RequestedSegmentationInfo {
            segments_are_disjoint: segments_are_disjoint(&segments),
            segments,
            init_font_segment,
            full_definition: Default::default(),
            init_font_glyphs: Default::default(),
            full_closure: Default::default(),
        };
        info.recompute_closures(closure_cache)?;
        Ok(info)
    }

    fn recompute_closures(
        &mut self,
        closure_cache: &mut GlyphClosureCache,
    ) -> Result<(), SegmenterError> {
        let mut all = self.init_font_segment.clone();
        for segment in &self.segments {
            all.union(segment.definition());
        }
        self.init_font_glyphs = closure_cache.glyph_closure(&self.init_font_segment)?;
        self.full_closure = closure_cache.glyph_closure(&all)?;
        self.full_definition = all;
        Ok(())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The subset definitions of all segments, in index order.
    pub fn segment_definitions(&self) -> Vec<SubsetDefinition> {
        self.segments
            .iter()
            .map(|s| s.definition().clone())
            .collect()
    }

    pub fn init_font_segment(&self) -> &SubsetDefinition {
        &self.init_font_segment
    }

    /// The init font segment with all default always included items removed.
    ///
    /// Useful when we need to know what non default items are included in the
    /// init font segment.
    pub fn init_font_segment_without_defaults(&self) -> SubsetDefinition {
        let mut result = self.init_font_segment.clone();
        let mut defaults = SubsetDefinition::default();
        add_init_subset_defaults(&mut defaults);
        result.subtract(&defaults);
        result
    }

    pub fn init_font_glyphs(&self) -> &GlyphSet {
        &self.init_font_glyphs
    }

    pub fn full_closure(&self) -> &GlyphSet {
        &self.full_closure
    }

    /// Union of the init font segment and every segment definition.
    pub fn full_definition(&self) -> &SubsetDefinition {
        &self.full_definition
    }

    pub fn segments_are_disjoint(&self) -> bool {
        self.segments_are_disjoint
    }

    /// Merges all of the segments in `to_merge` into `base`, assigning base
    /// the subset definition of `merged_segment`.
    ///
    /// The merged away segments are cleared rather than removed so that all
    /// other segment indices remain valid. Returns the codepoint count of the
    /// new base segment.
    pub fn assign_merged_segment(
        &mut self,
        base: u32,
        to_merge: &SegmentSet,
        merged_segment: Segment,
    ) -> usize {
        self.segments[base as usize] = merged_segment;
        for segment in to_merge.iter() {
            self.segments[segment as usize].clear();
        }
        // Total coverage is unchanged by a merge, so the cached closures and
        // full definition stay valid.
        self.segments[base as usize].definition().codepoints.len()
    }

    /// Replaces the init font segment, clearing `removed_segments` and
    /// recomputing the cached closures.
    pub fn reassign_init_subset(
        &mut self,
        closure_cache: &mut GlyphClosureCache,
        new_definition: SubsetDefinition,
        removed_segments: &SegmentSet,
    ) -> Result<(), SegmenterError> {
        for segment in removed_segments.iter() {
            self.segments[segment as usize].clear();
        }
        self.init_font_segment = new_definition;
        self.recompute_closures(closure_cache)
    }
}

fn segments_are_disjoint(segments: &[Segment]) -> bool {
    let mut codepoints = CodepointSet::empty();
    let mut features: BTreeSet<Tag> = BTreeSet::new();
    for segment in segments {
        let definition = segment.definition();
        if definition.codepoints.intersects(&codepoints)
            || definition
                .feature_tags
                .iter()
                .any(|tag| features.contains(tag))
        {
            return false;
        }
        codepoints.union(&definition.codepoints);
        features.extend(definition.feature_tags.iter().copied());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::int_set::IntSet;
    use crate::testdata::scripted_closure_cache;

    fn basic_info(cache: &mut GlyphClosureCache) -> RequestedSegmentationInfo {
        let segments = vec![
            Segment::from_codepoints(['a' as u32], 0.5),
            Segment::from_codepoints(['b' as u32], 0.4),
            Segment::from_codepoints(['c' as u32], 0.3),
        ];
        RequestedSegmentationInfo::new(
            segments,
            SubsetDefinition::codepoints(IntSet::from(['f' as u32])),
            cache,
        )
        .unwrap()
    }

    #[test]
    fn computes_closures_on_construction() {
        // cmap: a=1, b=2, c=3, f=6
        let mut cache = scripted_closure_cache(20);
        let info = basic_info(&mut cache);

        assert_eq!(info.init_font_glyphs(), &GlyphSet::from([0, 6]));
        assert_eq!(info.full_closure(), &GlyphSet::from([0, 1, 2, 3, 6]));
        assert!(info.segments_are_disjoint());
        assert_eq!(
            info.full_definition().codepoints,
            IntSet::from(['a' as u32, 'b' as u32, 'c' as u32, 'f' as u32])
        );
    }

    #[test]
    fn overlapping_segments_are_not_disjoint() {
        let mut cache = scripted_closure_cache(20);
        let segments = vec![
            Segment::from_codepoints(['a' as u32, 'b' as u32], 0.5),
            Segment::from_codepoints(['b' as u32], 0.4),
        ];
        let info = RequestedSegmentationInfo::new(
            segments,
            SubsetDefinition::default(),
            &mut cache,
        )
        .unwrap();
        assert!(!info.segments_are_disjoint());
    }

    #[test]
    fn assign_merged_segment_clears_merged_slots() {
        let mut cache = scripted_closure_cache(20);
        let mut info = basic_info(&mut cache);

        let mut merged = info.segments()[0].clone();
        merged
            .definition_mut()
            .union(info.segments()[2].definition());
        let count =
            info.assign_merged_segment(0, &SegmentSet::from([2]), merged);

        assert_eq!(count, 2);
        assert_eq!(info.segments().len(), 3);
        assert!(info.segments()[2].definition().is_empty());
        assert_eq!(
            info.segments()[0].definition().codepoints,
            IntSet::from(['a' as u32, 'c' as u32])
        );
    }

    #[test]
    fn reassign_init_subset_recomputes_closures() {
        let mut cache = scripted_closure_cache(20);
        let mut info = basic_info(&mut cache);

        let mut new_init = info.init_font_segment().clone();
        new_init
            .codepoints
            .union(&IntSet::from(['a' as u32]));
        info.reassign_init_subset(&mut cache, new_init, &SegmentSet::from([0]))
            .unwrap();

        assert!(info.segments()[0].definition().is_empty());
        assert_eq!(info.init_font_glyphs(), &GlyphSet::from([0, 1, 6]));
        assert_eq!(info.full_closure(), &GlyphSet::from([0, 1, 2, 3, 6]));
    }
}
