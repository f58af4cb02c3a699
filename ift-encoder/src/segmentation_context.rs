//! Mutable state shared by all phases of segmentation planning.

use crate::closure::GlyphClosure;
use crate::error::SegmenterError;
use crate::glyph_closure_cache::{GlyphClosureCache, SegmentAnalysis};
use crate::glyph_condition_set::GlyphConditionSet;
use crate::glyph_groupings::GlyphGroupings;
use crate::glyph_segmentation::GlyphSegmentation;
use crate::int_set::{GlyphSet, SegmentSet};
use crate::merger::MergeStrategy;
use crate::patch_size_cache::PatchSizeCache;
use crate::segment::Segment;
use crate::segmentation_info::RequestedSegmentationInfo;
use crate::subset_definition::SubsetDefinition;

/// Stores all of the information used while generating a glyph segmentation:
///
/// 1. The requested segmentation (segments plus initial subset).
/// 2. A glyph closure cache over the font being segmented.
/// 3. The per glyph condition set derived from closure analysis.
/// 4. Glyph groupings derived from the conditions.
///
/// All of these support incremental update: when the segment list changes only
/// the affected downstream pieces need to be recomputed.
pub struct SegmentationContext<'a> {
    pub(crate) glyph_closure_cache: GlyphClosureCache<'a>,
    pub(crate) patch_size_cache: Box<dyn PatchSizeCache + 'a>,
    pub(crate) patch_size_cache_for_init_font: Box<dyn PatchSizeCache + 'a>,

    pub(crate) segmentation_info: RequestedSegmentationInfo,
    pub(crate) merge_strategy: MergeStrategy,

    pub(crate) glyph_condition_set: GlyphConditionSet,
    pub(crate) inert_segments: SegmentSet,

    pub(crate) glyph_groupings: GlyphGroupings,
}

impl<'a> SegmentationContext<'a> {
    pub fn new(
        closure: Box<dyn GlyphClosure + 'a>,
        patch_size_cache: Box<dyn PatchSizeCache + 'a>,
        patch_size_cache_for_init_font: Box<dyn PatchSizeCache + 'a>,
        initial_segment: SubsetDefinition,
        segments: Vec<Segment>,
        merge_strategy: MergeStrategy,
    ) -> Result<SegmentationContext<'a>, SegmenterError> {
        let mut glyph_closure_cache = GlyphClosureCache::new(closure);
        let segmentation_info =
            RequestedSegmentationInfo::new(segments, initial_segment, &mut glyph_closure_cache)?;

        let num_glyphs = glyph_closure_cache.glyph_count();
        Ok(SegmentationContext {
            glyph_condition_set: GlyphConditionSet::new(num_glyphs),
            glyph_groupings: GlyphGroupings::new(segmentation_info.segments(), num_glyphs),
            glyph_closure_cache,
            patch_size_cache,
            patch_size_cache_for_init_font,
            segmentation_info,
            merge_strategy,
            inert_segments: SegmentSet::empty(),
        })
    }

    pub fn segmentation_info(&self) -> &RequestedSegmentationInfo {
        &self.segmentation_info
    }

    pub fn merge_strategy(&self) -> &MergeStrategy {
        &self.merge_strategy
    }

    pub fn inert_segments(&self) -> &SegmentSet {
        &self.inert_segments
    }

    /// Performs a closure analysis of the combined segments in `segment_ids`.
    pub fn analyze_segment(
        &mut self,
        segment_ids: &SegmentSet,
    ) -> Result<SegmentAnalysis, SegmenterError> {
        self.glyph_closure_cache
            .analyze_segment(&self.segmentation_info, segment_ids)
    }

    /// Removes all condition and grouping information related to the given
    /// glyphs and segments.
    pub fn invalidate_glyph_information(&mut self, glyphs: &GlyphSet, segments: &SegmentSet) {
        // Groupings are downstream of the glyph conditions, so they must be
        // invalidated first, while the old conditions are still visible.
        for gid in glyphs.iter() {
            let condition = self.glyph_condition_set.conditions_for(gid).clone();
            self.glyph_groupings
                .invalidate_glyph_information(&condition, gid);
        }

        self.glyph_condition_set.invalidate(glyphs, segments);
    }

    /// Re-analyzes one segment and rewrites its per glyph conditions.
    ///
    /// Returns the set of glyphs whose conditions changed; the caller uses
    /// this to drive [`Self::group_glyphs`].
    pub fn reprocess_segment(&mut self, segment_index: u32) -> Result<GlyphSet, SegmenterError> {
        let analysis = self
            .glyph_closure_cache
            .analyze_segment(&self.segmentation_info, &SegmentSet::from([segment_index]))?;

        let mut changed_gids = analysis.and_gids.clone();
        changed_gids.union(&analysis.or_gids);
        changed_gids.union(&analysis.exclusive_gids);
        for gid in changed_gids.iter() {
            self.invalidate_glyph_information(
                &GlyphSet::from([gid]),
                &SegmentSet::from([segment_index]),
            );
        }

        if analysis.and_gids.is_empty() && analysis.or_gids.is_empty() {
            // Does not interact with any other segment through the closure.
            self.inert_segments.insert(segment_index);
        }

        for gid in analysis.exclusive_gids.iter() {
            self.glyph_condition_set.add_and_condition(gid, segment_index);
        }
        for gid in analysis.and_gids.iter() {
            self.glyph_condition_set.add_and_condition(gid, segment_index);
        }
        for gid in analysis.or_gids.iter() {
            self.glyph_condition_set.add_or_condition(gid, segment_index);
        }

        Ok(changed_gids)
    }

    /// Updates the glyph groups for `glyphs`. The glyph condition set must be
    /// fully up to date prior to calling this.
    pub fn group_glyphs(&mut self, glyphs: &GlyphSet) -> Result<(), SegmenterError> {
        self.glyph_groupings.group_glyphs(
            &self.segmentation_info,
            &self.glyph_condition_set,
            &mut self.glyph_closure_cache,
            glyphs,
        )
    }

    /// Merges the definitions of `to_merge` into `base`. Returns the new
    /// codepoint count of base.
    pub fn assign_merged_segment(
        &mut self,
        base: u32,
        to_merge: &SegmentSet,
        merged_segment: Segment,
    ) -> usize {
        self.segmentation_info
            .assign_merged_segment(base, to_merge, merged_segment)
    }

    /// Replaces the initial font subset and recomputes all derived state.
    ///
    /// Growing the initial font changes the closure analysis of every
    /// remaining segment, so conditions and groupings are rebuilt from
    /// scratch.
    pub fn reassign_init_subset(
        &mut self,
        new_definition: SubsetDefinition,
        removed_segments: &SegmentSet,
    ) -> Result<(), SegmenterError> {
        self.segmentation_info.reassign_init_subset(
            &mut self.glyph_closure_cache,
            new_definition,
            removed_segments,
        )?;

        let num_glyphs = self.glyph_closure_cache.glyph_count();
        self.glyph_condition_set = GlyphConditionSet::new(num_glyphs);
        let mut groupings = GlyphGroupings::new(self.segmentation_info.segments(), num_glyphs);
        groupings.adopt_patch_combinations(&self.glyph_groupings);
        self.glyph_groupings = groupings;
        self.inert_segments.clear();

        for segment_index in 0..self.segmentation_info.segments().len() as u32 {
            if self.segmentation_info.segments()[segment_index as usize]
                .definition()
                .is_empty()
            {
                continue;
            }
            self.reprocess_segment(segment_index)?;
        }

        let mut all_glyphs = GlyphSet::empty();
        if num_glyphs > 0 {
            all_glyphs.insert_range(0..=num_glyphs - 1);
        }
        self.group_glyphs(&all_glyphs)
    }

    /// Converts this context into a finalized [`GlyphSegmentation`],
    /// validating the closure invariants first.
    pub fn to_glyph_segmentation(&self) -> Result<GlyphSegmentation, SegmenterError> {
        let segmentation = self
            .glyph_groupings
            .to_glyph_segmentation(&self.segmentation_info)?;
        self.glyph_closure_cache.log_cache_stats("finalization");
        self.validate_segmentation(&segmentation)?;
        Ok(segmentation)
    }

    // Ensures that the produced segmentation is disjoint, doesn't overlap the
    // initial font, and fully covers the full closure.
    fn validate_segmentation(
        &self,
        segmentation: &GlyphSegmentation,
    ) -> Result<(), SegmenterError> {
        let initial_closure = segmentation.init_font_glyphs();
        let mut visited = GlyphSet::empty();
        for gids in segmentation.patches().values() {
            for gid in gids.iter() {
                if initial_closure.contains(gid) {
                    return Err(SegmenterError::FailedPrecondition(
                        "initial font glyph is present in a patch".to_string(),
                    ));
                }
                if !visited.insert(gid) {
                    return Err(SegmenterError::FailedPrecondition(
                        "glyph segments are not disjoint".to_string(),
                    ));
                }
            }
        }

        let mut full_minus_initial = self.segmentation_info.full_closure().clone();
        full_minus_initial.subtract(initial_closure);

        if full_minus_initial != visited {
            return Err(SegmenterError::FailedPrecondition(
                "not all glyphs in the full closure have been placed".to_string(),
            ));
        }

        Ok(())
    }

    /// Checks that the incrementally maintained conditions and groupings
    /// match what a from scratch recomputation produces.
    ///
    /// This is a correctness oracle; it is expensive and meant for tests and
    /// debug builds.
    pub fn validate_incremental_groupings(&mut self) -> Result<(), SegmenterError> {
        let num_glyphs = self.glyph_closure_cache.glyph_count();
        let mut conditions = GlyphConditionSet::new(num_glyphs);
        let mut groupings = GlyphGroupings::new(self.segmentation_info.segments(), num_glyphs);
        groupings.adopt_patch_combinations(&self.glyph_groupings);

        for segment_index in 0..self.segmentation_info.segments().len() as u32 {
            if self.segmentation_info.segments()[segment_index as usize]
                .definition()
                .is_empty()
            {
                continue;
            }
            let analysis = self
                .glyph_closure_cache
                .analyze_segment(&self.segmentation_info, &SegmentSet::from([segment_index]))?;
            for gid in analysis.exclusive_gids.iter() {
                conditions.add_and_condition(gid, segment_index);
            }
            for gid in analysis.and_gids.iter() {
                conditions.add_and_condition(gid, segment_index);
            }
            for gid in analysis.or_gids.iter() {
                conditions.add_or_condition(gid, segment_index);
            }
        }

        let mut all_glyphs = GlyphSet::empty();
        if num_glyphs > 0 {
            all_glyphs.insert_range(0..=num_glyphs - 1);
        }
        groupings.group_glyphs(
            &self.segmentation_info,
            &conditions,
            &mut self.glyph_closure_cache,
            &all_glyphs,
        )?;

        if conditions != self.glyph_condition_set {
            return Err(SegmenterError::FailedPrecondition(
                "incremental glyph condition set disagrees with recomputation".to_string(),
            ));
        }
        if groupings.conditions_and_glyphs() != self.glyph_groupings.conditions_and_glyphs() {
            return Err(SegmenterError::FailedPrecondition(
                "incremental conditions and glyphs disagree with recomputation".to_string(),
            ));
        }
        if groupings.and_glyph_groups() != self.glyph_groupings.and_glyph_groups() {
            return Err(SegmenterError::FailedPrecondition(
                "incremental and glyph groups disagree with recomputation".to_string(),
            ));
        }
        if groupings.or_glyph_groups() != self.glyph_groupings.or_glyph_groups() {
            return Err(SegmenterError::FailedPrecondition(
                "incremental or glyph groups disagree with recomputation".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::{scripted_gid, FixedPatchSizeCache, ScriptedFont};

    fn cp(c: char) -> u32 {
        c as u32
    }

    fn context_with_ligature() -> SegmentationContext<'static> {
        let font = ScriptedFont::new(40)
            .with_ligature(&[cp('e'), cp('g')], 30)
            .with_alternate(&[cp('g'), cp('h')], 31);
        SegmentationContext::new(
            Box::new(font),
            Box::new(FixedPatchSizeCache::new(10)),
            Box::new(FixedPatchSizeCache::new(10)),
            SubsetDefinition::default(),
            vec![
                Segment::from_codepoints([cp('a'), cp('b')], 0.5),
                Segment::from_codepoints([cp('e'), cp('f')], 0.3),
                Segment::from_codepoints([cp('g')], 0.2),
                Segment::from_codepoints([cp('h')], 0.1),
            ],
            MergeStrategy::none(),
        )
        .unwrap()
    }

    fn analyze_all(context: &mut SegmentationContext) {
        let mut changed = GlyphSet::empty();
        for segment in 0..context.segmentation_info().segments().len() as u32 {
            changed.union(&context.reprocess_segment(segment).unwrap());
        }
        let mut all = GlyphSet::empty();
        all.insert_range(0..=39);
        context.group_glyphs(&all).unwrap();
        assert!(!changed.is_empty());
    }

    #[test]
    fn reprocess_segment_builds_conditions() {
        let mut context = context_with_ligature();
        analyze_all(&mut context);

        // a and b are exclusive to segment 0.
        assert_eq!(
            context
                .glyph_condition_set
                .conditions_for(scripted_gid('a'))
                .and_segments,
            SegmentSet::from([0])
        );
        // The ligature (gid 30) requires segments 1 and 2.
        assert_eq!(
            context.glyph_condition_set.conditions_for(30).and_segments,
            SegmentSet::from([1, 2])
        );
        // The alternate (gid 31) is disjunctive on segments 2 and 3.
        assert_eq!(
            context.glyph_condition_set.conditions_for(31).or_segments,
            SegmentSet::from([2, 3])
        );

        // Segment 0 is inert, the interacting ones are not.
        assert!(context.inert_segments().contains(0));
        assert!(!context.inert_segments().contains(2));
    }

    #[test]
    fn finalization_validates_and_covers_closure() {
        let mut context = context_with_ligature();
        analyze_all(&mut context);

        let segmentation = context.to_glyph_segmentation().unwrap();

        // Patches are disjoint and cover exactly full closure minus initial.
        let mut covered = GlyphSet::empty();
        for glyphs in segmentation.patches().values() {
            for gid in glyphs.iter() {
                assert!(covered.insert(gid));
            }
        }
        let mut expected = context.segmentation_info().full_closure().clone();
        expected.subtract(context.segmentation_info().init_font_glyphs());
        assert_eq!(covered, expected);
    }

    #[test]
    fn incremental_groupings_match_oracle_after_merge() {
        let mut context = context_with_ligature();
        analyze_all(&mut context);

        // Merge segment 3 into segment 2 and incrementally reprocess.
        let mut merged = context.segmentation_info().segments()[2].clone();
        merged
            .definition_mut()
            .union(context.segmentation_info().segments()[3].definition());

        let mut invalidated = context.glyph_condition_set.glyphs_with_segment(2);
        invalidated.union(&context.glyph_condition_set.glyphs_with_segment(3));

        context.assign_merged_segment(2, &SegmentSet::from([3]), merged);
        context
            .glyph_groupings
            .remove_fallback_segments(&SegmentSet::from([3]));
        context.invalidate_glyph_information(&invalidated, &SegmentSet::from([2, 3]));

        let mut modified = context.reprocess_segment(2).unwrap();
        modified.union(&invalidated);
        context.group_glyphs(&modified).unwrap();

        context.validate_incremental_groupings().unwrap();

        let segmentation = context.to_glyph_segmentation().unwrap();
        // The alternate is now reachable only through the merged segment 2,
        // while the ligature still needs segments 1 and 2 together.
        assert!(context.glyph_groupings.exclusive_glyphs(2).contains(31));
        assert_eq!(
            context.glyph_condition_set.conditions_for(30).and_segments,
            SegmentSet::from([1, 2])
        );
        assert!(segmentation.segments()[3].is_empty());
    }

    #[test]
    fn reassign_init_subset_rebuilds_state() {
        let mut context = context_with_ligature();
        analyze_all(&mut context);

        // Move segment 0's codepoints into the initial font.
        let mut new_init = context
            .segmentation_info()
            .init_font_segment_without_defaults();
        new_init.union(context.segmentation_info().segments()[0].definition());
        context
            .reassign_init_subset(new_init, &SegmentSet::from([0]))
            .unwrap();

        assert!(context.segmentation_info().segments()[0]
            .definition()
            .is_empty());
        assert!(context
            .segmentation_info()
            .init_font_glyphs()
            .contains(scripted_gid('a')));
        assert_eq!(context.glyph_groupings.exclusive_glyphs(0), GlyphSet::empty());

        // The plan still validates.
        context.to_glyph_segmentation().unwrap();
        context.validate_incremental_groupings().unwrap();
    }
}
