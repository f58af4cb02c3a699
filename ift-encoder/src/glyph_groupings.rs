//! Grouping of the glyphs in a font by their activation conditions.

use std::collections::{BTreeMap, BTreeSet};

use fnv::FnvHashMap;

use crate::activation_condition::ActivationCondition;
use crate::error::SegmenterError;
use crate::glyph_closure_cache::GlyphClosureCache;
use crate::glyph_condition_set::{GlyphConditionSet, GlyphConditions};
use crate::glyph_partition::GlyphPartition;
use crate::glyph_segmentation::GlyphSegmentation;
use crate::int_set::{GlyphSet, SegmentSet};
use crate::segment::Segment;
use crate::segmentation_info::RequestedSegmentationInfo;

/// Glyphs grouped by the conditions which activate them.
///
/// Derived incrementally from a [`GlyphConditionSet`]; callers feed in the
/// set of glyphs whose conditions changed and the groupings are updated to
/// match.
pub struct GlyphGroupings {
    and_glyph_groups: BTreeMap<SegmentSet, GlyphSet>,
    or_glyph_groups: BTreeMap<SegmentSet, GlyphSet>,
    exclusive_glyph_groups: BTreeMap<u32, GlyphSet>,

    // An alternate representation of the groups above, keyed by condition.
    conditions_and_glyphs: BTreeMap<ActivationCondition, GlyphSet>,

    // Maps segments to all conditions in conditions_and_glyphs which
    // reference that segment.
    triggering_segment_to_conditions: FnvHashMap<u32, BTreeSet<ActivationCondition>>,

    // Set of segments in the fallback condition.
    fallback_segments: SegmentSet,

    // These glyphs aren't mapped by any conditions and as a result are
    // included in the fallback patch.
    unmapped_glyphs: GlyphSet,

    // Explicit patch combination requests from the merger. Conditions whose
    // glyph groups land in the same class are replaced by a single combined
    // condition during grouping.
    combined_patches: GlyphPartition,
    combined_or_glyph_groups: BTreeMap<SegmentSet, GlyphSet>,
    combined_exclusive_segments: SegmentSet,
}

impl GlyphGroupings {
    pub fn new(segments: &[Segment], num_glyphs: u32) -> GlyphGroupings {
        let mut fallback_segments = SegmentSet::empty();
        for (index, segment) in segments.iter().enumerate() {
            if !segment.definition().is_empty() {
                fallback_segments.insert(index as u32);
            }
        }

        GlyphGroupings {
            and_glyph_groups: Default::default(),
            or_glyph_groups: Default::default(),
            exclusive_glyph_groups: Default::default(),
            conditions_and_glyphs: Default::default(),
            triggering_segment_to_conditions: Default::default(),
            fallback_segments,
            unmapped_glyphs: Default::default(),
            combined_patches: GlyphPartition::new(num_glyphs),
            combined_or_glyph_groups: Default::default(),
            combined_exclusive_segments: Default::default(),
        }
    }

    pub fn conditions_and_glyphs(&self) -> &BTreeMap<ActivationCondition, GlyphSet> {
        &self.conditions_and_glyphs
    }

    pub fn and_glyph_groups(&self) -> &BTreeMap<SegmentSet, GlyphSet> {
        &self.and_glyph_groups
    }

    pub fn or_glyph_groups(&self) -> &BTreeMap<SegmentSet, GlyphSet> {
        &self.or_glyph_groups
    }

    pub fn unmapped_glyphs(&self) -> &GlyphSet {
        &self.unmapped_glyphs
    }

    pub fn fallback_segments(&self) -> &SegmentSet {
        &self.fallback_segments
    }

    /// The glyphs exclusively activated by `segment`.
    ///
    /// Segments whose exclusive patch has been combined away report an empty
    /// set.
    pub fn exclusive_glyphs(&self, segment: u32) -> GlyphSet {
        if self.combined_exclusive_segments.contains(segment) {
            return GlyphSet::empty();
        }
        self.exclusive_glyph_groups
            .get(&segment)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a snapshot of the conditions which reference `segment`.
    pub fn triggering_segment_to_conditions(
        &self,
        segment: u32,
    ) -> BTreeSet<ActivationCondition> {
        self.triggering_segment_to_conditions
            .get(&segment)
            .cloned()
            .unwrap_or_default()
    }

    fn add_condition_and_glyphs(&mut self, condition: ActivationCondition, glyphs: GlyphSet) {
        for segment in condition.triggering_segments().iter() {
            self.triggering_segment_to_conditions
                .entry(segment)
                .or_default()
                .insert(condition.clone());
        }
        self.conditions_and_glyphs.insert(condition, glyphs);
    }

    fn remove_condition_and_glyphs(&mut self, condition: &ActivationCondition) {
        self.conditions_and_glyphs.remove(condition);
        for segment in condition.triggering_segments().iter() {
            if let Some(conditions) = self.triggering_segment_to_conditions.get_mut(&segment) {
                conditions.remove(condition);
            }
        }
    }

    /// Removes all stored grouping information related to a glyph with the
    /// given conditions.
    pub fn invalidate_glyph_information(&mut self, condition: &GlyphConditions, gid: u32) {
        if condition.and_segments.len() == 1 {
            let segment = condition.and_segments.first().unwrap();
            let activation = ActivationCondition::exclusive_segment(segment, 0);
            if let Some(glyphs) = self.exclusive_glyph_groups.get_mut(&segment) {
                glyphs.remove(gid);
                if glyphs.is_empty() {
                    self.exclusive_glyph_groups.remove(&segment);
                    self.remove_condition_and_glyphs(&activation);
                } else if let Some(glyphs) = self.conditions_and_glyphs.get_mut(&activation) {
                    glyphs.remove(gid);
                }
            }
        }

        if condition.and_segments.len() > 1 {
            let activation = ActivationCondition::and_segments(&condition.and_segments, 0);
            if let Some(glyphs) = self.and_glyph_groups.get_mut(&condition.and_segments) {
                glyphs.remove(gid);
                if glyphs.is_empty() {
                    self.and_glyph_groups.remove(&condition.and_segments);
                    self.remove_condition_and_glyphs(&activation);
                } else if let Some(glyphs) = self.conditions_and_glyphs.get_mut(&activation) {
                    glyphs.remove(gid);
                }
            }
        }

        if !condition.or_segments.is_empty() {
            let activation = ActivationCondition::or_segments(&condition.or_segments, 0);
            if let Some(glyphs) = self.or_glyph_groups.get_mut(&condition.or_segments) {
                glyphs.remove(gid);
                if glyphs.is_empty() {
                    self.or_glyph_groups.remove(&condition.or_segments);
                    self.remove_condition_and_glyphs(&activation);
                } else if let Some(glyphs) = self.conditions_and_glyphs.get_mut(&activation) {
                    glyphs.remove(gid);
                }
            }
        }

        self.unmapped_glyphs.remove(gid);

        // Changes may affect the combined conditions in complex ways, so drop
        // them all. They are fully recalculated during grouping.
        self.remove_all_combined_conditions();
    }

    /// Removes a set of segments from the fallback segments set and
    /// invalidates the fallback glyph group.
    pub fn remove_fallback_segments(&mut self, removed_segments: &SegmentSet) {
        // The fallback 'or group' is fully recomputed by group_glyphs.
        self.or_glyph_groups.remove(&self.fallback_segments);
        self.fallback_segments.subtract(removed_segments);
    }

    /// Adds glyphs to an existing exclusive group (the AND group of a single
    /// segment) without running closure analysis.
    pub fn add_glyphs_to_exclusive_group(
        &mut self,
        exclusive_segment: u32,
        glyphs: &GlyphSet,
    ) -> Result<(), SegmenterError> {
        self.exclusive_glyph_groups
            .entry(exclusive_segment)
            .or_default()
            .union(glyphs);

        let condition = ActivationCondition::exclusive_segment(exclusive_segment, 0);
        self.conditions_and_glyphs
            .entry(condition.clone())
            .or_default()
            .union(glyphs);
        self.triggering_segment_to_conditions
            .entry(exclusive_segment)
            .or_default()
            .insert(condition);

        // The enlarged group may now overlap a combined patch.
        self.remove_all_combined_conditions();
        self.recompute_combined_conditions()
    }

    /// Copies the patch combination requests of `other` into this grouping.
    ///
    /// Used when rebuilding groupings from scratch (oracle validation, init
    /// subset reassignment) so combination state survives the rebuild.
    pub(crate) fn adopt_patch_combinations(&mut self, other: &GlyphGroupings) {
        self.combined_patches = other.combined_patches.clone();
    }

    /// Requests that the patches containing the glyphs of `a` and `b` be
    /// combined into one.
    pub fn combine_patches(&mut self, a: &GlyphSet, b: &GlyphSet) -> Result<(), SegmenterError> {
        self.combined_patches.union_set(a)?;
        self.combined_patches.union_set(b)?;
        if let (Some(a_first), Some(b_first)) = (a.first(), b.first()) {
            self.combined_patches.union(a_first, b_first)?;
        }

        self.remove_all_combined_conditions();
        Ok(())
    }

    /// Updates this grouping for all glyphs in `glyphs` to match the
    /// associated conditions in `condition_set`.
    pub fn group_glyphs(
        &mut self,
        info: &RequestedSegmentationInfo,
        condition_set: &GlyphConditionSet,
        closure_cache: &mut GlyphClosureCache,
        glyphs: &GlyphSet,
    ) -> Result<(), SegmenterError> {
        self.remove_all_combined_conditions();

        let mut modified_exclusive_segments = SegmentSet::empty();
        let mut modified_and_groups: BTreeSet<SegmentSet> = BTreeSet::new();
        let mut modified_or_groups: BTreeSet<SegmentSet> = BTreeSet::new();

        for gid in glyphs.iter() {
            let condition = condition_set.conditions_for(gid);

            if !condition.and_segments.is_empty() {
                if condition.and_segments.len() == 1 {
                    let segment = condition.and_segments.first().unwrap();
                    self.exclusive_glyph_groups
                        .entry(segment)
                        .or_default()
                        .insert(gid);
                    modified_exclusive_segments.insert(segment);
                } else {
                    self.and_glyph_groups
                        .entry(condition.and_segments.clone())
                        .or_default()
                        .insert(gid);
                    modified_and_groups.insert(condition.and_segments.clone());
                }
            }

            if !condition.or_segments.is_empty() {
                self.or_glyph_groups
                    .entry(condition.or_segments.clone())
                    .or_default()
                    .insert(gid);
                modified_or_groups.insert(condition.or_segments.clone());
            }

            if condition.is_empty()
                && !info.init_font_glyphs().contains(gid)
                && info.full_closure().contains(gid)
            {
                // Not activated anywhere but needed in the full closure, so
                // it must go into the fallback patch.
                self.unmapped_glyphs.insert(gid);
            }
        }

        // Exclusive and AND conditions are never spurious, publish directly.
        for segment in modified_exclusive_segments.iter() {
            let glyphs = self.exclusive_glyph_groups[&segment].clone();
            self.add_condition_and_glyphs(
                ActivationCondition::exclusive_segment(segment, 0),
                glyphs,
            );
        }
        for group in &modified_and_groups {
            let glyphs = self.and_glyph_groups[group].clone();
            self.add_condition_and_glyphs(ActivationCondition::and_segments(group, 0), glyphs);
        }

        // An or group represents the hypothesis that its glyphs depend only
        // disjunctively on the group's segments. Glyphs with additional
        // undetected conditions must be ruled out: anything disjunctively
        // reachable through the remaining segments is not safely activated by
        // this group and is moved to the unmapped set.
        for group in &modified_or_groups {
            let mut all_other_segment_ids = SegmentSet::empty();
            if !info.segments().is_empty() {
                all_other_segment_ids.insert_range(0..=(info.segments().len() as u32 - 1));
                all_other_segment_ids.subtract(group);
            }

            let or_gids = closure_cache.codepoints_to_or_gids(info, &all_other_segment_ids)?;

            let Some(group_glyphs) = self.or_glyph_groups.get_mut(group) else {
                continue;
            };
            for gid in or_gids.iter() {
                if group_glyphs.remove(gid) {
                    self.unmapped_glyphs.insert(gid);
                }
            }

            let condition = ActivationCondition::or_segments(group, 0);
            if group_glyphs.is_empty() {
                self.or_glyph_groups.remove(group);
                self.remove_condition_and_glyphs(&condition);
                continue;
            }

            let glyphs = self.or_glyph_groups[group].clone();
            self.add_condition_and_glyphs(condition, glyphs);
        }

        // Combined conditions can't be incrementally updated, recompute them
        // in full.
        self.recompute_combined_conditions()?;

        // The fallback group mirrors the unmapped set exactly. It is not
        // published into conditions_and_glyphs; all downstream processing
        // ignores the fallback.
        self.or_glyph_groups.remove(&self.fallback_segments);
        if !self.unmapped_glyphs.is_empty() {
            self.or_glyph_groups
                .insert(self.fallback_segments.clone(), self.unmapped_glyphs.clone());
        }

        Ok(())
    }

    fn remove_all_combined_conditions(&mut self) {
        let groups: Vec<SegmentSet> = self.combined_or_glyph_groups.keys().cloned().collect();
        for segments in groups {
            self.remove_condition_and_glyphs(&ActivationCondition::or_segments(&segments, 0));
        }
        self.combined_or_glyph_groups.clear();
        self.combined_exclusive_segments.clear();
    }

    // Finds the exclusive segments and or groups whose glyphs overlap a
    // combined patch class.
    fn groups_affected_by_combination(
        &mut self,
    ) -> Result<(SegmentSet, BTreeSet<SegmentSet>), SegmenterError> {
        let combined_groups: Vec<GlyphSet> = self.combined_patches.non_identity_groups()?.to_vec();

        let mut exclusive_segments = SegmentSet::empty();
        let mut or_groups: BTreeSet<SegmentSet> = BTreeSet::new();
        if combined_groups.is_empty() {
            return Ok((exclusive_segments, or_groups));
        }

        for (segment, glyphs) in &self.exclusive_glyph_groups {
            if combined_groups.iter().any(|group| group.intersects(glyphs)) {
                exclusive_segments.insert(*segment);
            }
        }
        for (segments, glyphs) in &self.or_glyph_groups {
            if *segments == self.fallback_segments {
                continue;
            }
            if combined_groups.iter().any(|group| group.intersects(glyphs)) {
                or_groups.insert(segments.clone());
            }
        }

        Ok((exclusive_segments, or_groups))
    }

    // Rebuilds the combined conditions requested through combine_patches.
    //
    // Each affected group maps to a representative in the partition formed by
    // the combined patches. Where an existing group is combined the original
    // condition is removed; where it is not, the condition is (re)added.
    fn recompute_combined_conditions(&mut self) -> Result<(), SegmenterError> {
        let (exclusive_segments, or_groups) = self.groups_affected_by_combination()?;
        if exclusive_segments.is_empty() && or_groups.is_empty() {
            return Ok(());
        }

        let mut partition = self.combined_patches.clone();
        for segment in exclusive_segments.iter() {
            if let Some(glyphs) = self.exclusive_glyph_groups.get(&segment) {
                partition.union_set(glyphs)?;
            }
        }
        for segments in &or_groups {
            if let Some(glyphs) = self.or_glyph_groups.get(segments) {
                partition.union_set(glyphs)?;
            }
        }

        let mut merged_conditions: BTreeMap<u32, SegmentSet> = BTreeMap::new();
        let mut merged_glyphs: BTreeMap<u32, GlyphSet> = BTreeMap::new();

        for segment in exclusive_segments.iter() {
            let Some(glyphs) = self.exclusive_glyph_groups.get(&segment).cloned() else {
                continue;
            };
            let Some(first) = glyphs.first() else {
                continue;
            };

            let representative = partition.find(first)?;
            if &glyphs != partition.glyphs_for(representative)? {
                merged_conditions
                    .entry(representative)
                    .or_default()
                    .insert(segment);
                merged_glyphs
                    .entry(representative)
                    .or_default()
                    .union(&glyphs);
                self.remove_condition_and_glyphs(&ActivationCondition::exclusive_segment(
                    segment, 0,
                ));
                // Record the segment as having been removed via combination.
                self.combined_exclusive_segments.insert(segment);
            } else {
                self.add_condition_and_glyphs(
                    ActivationCondition::exclusive_segment(segment, 0),
                    glyphs,
                );
            }
        }

        for segments in &or_groups {
            let Some(glyphs) = self.or_glyph_groups.get(segments).cloned() else {
                continue;
            };
            let Some(first) = glyphs.first() else {
                continue;
            };

            let representative = partition.find(first)?;
            if &glyphs != partition.glyphs_for(representative)? {
                merged_conditions
                    .entry(representative)
                    .or_default()
                    .union(segments);
                merged_glyphs
                    .entry(representative)
                    .or_default()
                    .union(&glyphs);
                self.remove_condition_and_glyphs(&ActivationCondition::or_segments(segments, 0));
            } else {
                self.add_condition_and_glyphs(
                    ActivationCondition::or_segments(segments, 0),
                    glyphs,
                );
            }
        }

        for (representative, segments) in merged_conditions {
            let glyphs = merged_glyphs
                .remove(&representative)
                .ok_or_else(|| SegmenterError::Internal("combined glyphs missing".to_string()))?;

            let condition = if segments.len() == 1
                && self.combined_exclusive_segments.contains(segments.first().unwrap())
            {
                // A combination that only involves one exclusive group stays
                // exclusive.
                self.combined_exclusive_segments.remove(segments.first().unwrap());
                ActivationCondition::exclusive_segment(segments.first().unwrap(), 0)
            } else {
                self.combined_or_glyph_groups
                    .insert(segments.clone(), glyphs.clone());
                ActivationCondition::or_segments(&segments, 0)
            };

            self.add_condition_and_glyphs(condition, glyphs);
        }

        Ok(())
    }

    /// Converts this grouping into a finalized [`GlyphSegmentation`].
    ///
    /// Patch ids are allocated per published condition in ascending condition
    /// order; the fallback patch (if any glyphs are unmapped) is emitted last
    /// with a condition over every non empty segment.
    pub fn to_glyph_segmentation(
        &self,
        info: &RequestedSegmentationInfo,
    ) -> Result<GlyphSegmentation, SegmenterError> {
        let mut segmentation = GlyphSegmentation::new(
            info.init_font_segment_without_defaults(),
            info.init_font_glyphs().clone(),
            self.unmapped_glyphs.clone(),
            info.segment_definitions(),
        );

        let mut next_patch_id = 0u32;
        for (condition, glyphs) in &self.conditions_and_glyphs {
            if glyphs.is_empty() {
                continue;
            }
            segmentation.add_patch(
                next_patch_id,
                condition.with_activated(next_patch_id),
                glyphs.clone(),
            );
            next_patch_id += 1;
        }

        if !self.unmapped_glyphs.is_empty() {
            segmentation.add_patch(
                next_patch_id,
                ActivationCondition::fallback(&self.fallback_segments, next_patch_id),
                self.unmapped_glyphs.clone(),
            );
        }

        Ok(segmentation)
    }
}

impl PartialEq for GlyphGroupings {
    fn eq(&self, other: &Self) -> bool {
        self.and_glyph_groups == other.and_glyph_groups
            && self.or_glyph_groups == other.or_glyph_groups
            && self.exclusive_glyph_groups == other.exclusive_glyph_groups
            && self.combined_or_glyph_groups == other.combined_or_glyph_groups
            && self.unmapped_glyphs == other.unmapped_glyphs
    }
}
