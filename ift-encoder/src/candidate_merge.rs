//! Assessment and application of candidate merge operations.

use std::collections::BTreeMap;

use crate::activation_condition::ActivationCondition;
use crate::error::SegmenterError;
use crate::int_set::{GlyphSet, SegmentSet};
use crate::segment::Segment;
use crate::segmentation_context::SegmentationContext;
use crate::segmentation_info::RequestedSegmentationInfo;

#[derive(Clone, Debug)]
enum MergeKind {
    /// Merge segment definitions into the base segment.
    Segments,
    /// Combine the patches carrying these glyph groups, leaving all segment
    /// definitions untouched.
    Patches { groups: Vec<GlyphSet> },
}

/// A possible merge operation, with its estimated patch size and the change
/// in the overall cost objective it would cause.
#[derive(Clone, Debug)]
pub(crate) struct CandidateMerge {
    pub(crate) base_segment_index: u32,

    // The segments to be merged into base; does not include base itself.
    pub(crate) segments_to_merge: SegmentSet,

    pub(crate) merged_segment: Segment,

    // True when the merged segment won't interact with the closure, allowing
    // conditions to be updated without re-analysis.
    pub(crate) new_segment_is_inert: bool,

    pub(crate) new_patch_size: u32,

    // Change in Σ p(c)·(size(c) + overhead) if this merge is applied.
    pub(crate) cost_delta: f64,

    // Glyphs whose conditions and groupings need recomputation after apply.
    pub(crate) invalidated_glyphs: GlyphSet,

    kind: MergeKind,
}

impl CandidateMerge {
    /// The do nothing candidate: used by the cost strategy to reject any
    /// merge with a non negative cost delta once the base segment has met the
    /// minimum group size.
    pub(crate) fn baseline_candidate(
        base_segment_index: u32,
        base_patch_size: u32,
        probability: f64,
    ) -> CandidateMerge {
        CandidateMerge {
            base_segment_index,
            segments_to_merge: SegmentSet::from([base_segment_index]),
            merged_segment: Segment::new(Default::default(), probability),
            new_segment_is_inert: false,
            new_patch_size: base_patch_size,
            cost_delta: 0.0,
            invalidated_glyphs: GlyphSet::empty(),
            kind: MergeKind::Segments,
        }
    }

    /// True when this candidate is the no merge baseline.
    pub(crate) fn is_baseline(&self) -> bool {
        matches!(self.kind, MergeKind::Segments)
            && self.segments_to_merge == SegmentSet::from([self.base_segment_index])
    }

    /// Whether the patch for `glyphs` is below the heuristic minimum size.
    pub(crate) fn is_patch_too_small(
        context: &mut SegmentationContext,
        base_segment_index: u32,
        glyphs: &GlyphSet,
    ) -> Result<bool, SegmenterError> {
        let patch_size_bytes = context.patch_size_cache.patch_size(glyphs)?;
        if patch_size_bytes >= context.merge_strategy.patch_size_min_bytes() {
            return Ok(false);
        }

        log::debug!(
            "patch for segment {base_segment_index} is too small ({patch_size_bytes} < {}), merging",
            context.merge_strategy.patch_size_min_bytes()
        );
        Ok(true)
    }

    /// Assesses merging the definitions of `to_merge_segments` into
    /// `base_segment_index`.
    ///
    /// Returns `None` when the merge is rejected: over the heuristic size
    /// cap, mixing codepoint only with feature only segments (heuristic), or
    /// involving conditions whose probability arithmetic is unsupported.
    pub(crate) fn assess_segment_merge(
        context: &mut SegmentationContext,
        base_segment_index: u32,
        to_merge_segments: &SegmentSet,
    ) -> Result<Option<CandidateMerge>, SegmenterError> {
        let use_costs = context.merge_strategy.use_costs();
        if !use_costs
            && would_mix_features_and_codepoints(
                &context.segmentation_info,
                base_segment_index,
                to_merge_segments,
            )
        {
            // Without a cost function, merging a codepoint segment with a
            // rarely used optional feature segment just inflates the
            // codepoint patches.
            log::debug!("merge would mix features into a codepoint only segment, skipping");
            return Ok(None);
        }

        let mut segments_to_merge = to_merge_segments.clone();
        segments_to_merge.remove(base_segment_index);
        let mut segments_to_merge_with_base = segments_to_merge.clone();
        segments_to_merge_with_base.insert(base_segment_index);

        if segments_to_merge.is_empty() {
            return Ok(None);
        }

        let new_segment_is_inert = context.inert_segments.contains(base_segment_index)
            && segments_to_merge.is_subset_of(&context.inert_segments);

        let merged_segment = merge_segments(
            &context.segmentation_info,
            base_segment_index,
            &segments_to_merge,
        );

        // Segments removed by the merge may appear in glyph conditions; those
        // glyphs (and their downstream groups) will need recomputation.
        // Changes caused by adding new coverage to the base segment are
        // handled by the closure re-analysis that follows an applied merge.
        let mut invalidated_glyphs = GlyphSet::empty();
        for segment_index in segments_to_merge.iter() {
            invalidated_glyphs.union(&context.glyph_condition_set.glyphs_with_segment(segment_index));
        }

        let new_patch_size = if !new_segment_is_inert {
            let analysis = context.analyze_segment(&segments_to_merge_with_base)?;
            context.patch_size_cache.patch_size(&analysis.exclusive_gids)?
        } else {
            // For inert merges the patch glyphs are just the union of the
            // glyphs of every involved segment, no closure needed.
            let mut merged_glyphs = invalidated_glyphs.clone();
            merged_glyphs.union(
                &context
                    .glyph_condition_set
                    .glyphs_with_segment(base_segment_index),
            );
            context.patch_size_cache.patch_size(&merged_glyphs)?
        };

        if !use_costs && new_patch_size > context.merge_strategy.patch_size_max_bytes() {
            return Ok(None);
        }

        let cost_delta = if use_costs {
            match compute_cost_delta(
                context,
                &segments_to_merge_with_base,
                &merged_segment,
                new_patch_size,
            ) {
                Ok(delta) => delta,
                // Not a candidate: conditions with unsupported probability
                // arithmetic are involved.
                Err(SegmenterError::Unimplemented(_)) => return Ok(None),
                Err(err) => return Err(err),
            }
        } else {
            0.0
        };

        Ok(Some(CandidateMerge {
            base_segment_index,
            segments_to_merge,
            merged_segment,
            new_segment_is_inert,
            new_patch_size,
            cost_delta,
            invalidated_glyphs,
            kind: MergeKind::Segments,
        }))
    }

    /// Assesses combining the patches referenced by a disjunctive composite
    /// condition, leaving the segment definitions untouched.
    pub(crate) fn assess_patch_merge(
        context: &mut SegmentationContext,
        base_segment_index: u32,
        condition: &ActivationCondition,
    ) -> Result<Option<CandidateMerge>, SegmenterError> {
        if condition.conditions().len() != 1 || condition.is_fallback() {
            return Ok(None);
        }

        let Some(or_glyphs) = context
            .glyph_groupings
            .conditions_and_glyphs()
            .get(condition)
            .cloned()
        else {
            return Ok(None);
        };

        let triggering_segments = condition.triggering_segments();
        let mut groups = vec![or_glyphs.clone()];
        let mut removed: Vec<(ActivationCondition, GlyphSet)> =
            vec![(condition.clone(), or_glyphs)];
        for segment in triggering_segments.iter() {
            let glyphs = context.glyph_groupings.exclusive_glyphs(segment);
            if glyphs.is_empty() {
                continue;
            }
            removed.push((
                ActivationCondition::exclusive_segment(segment, 0),
                glyphs.clone(),
            ));
            groups.push(glyphs);
        }
        if groups.len() < 2 {
            // Nothing to combine with.
            return Ok(None);
        }

        let mut merged_glyphs = GlyphSet::empty();
        for group in &groups {
            merged_glyphs.union(group);
        }
        let new_patch_size = context.patch_size_cache.patch_size(&merged_glyphs)?;

        let overhead = context.merge_strategy.network_overhead_bytes() as f64;
        let segments = context.segmentation_info.segments();
        let merged_probability = match condition.probability(segments) {
            Ok(p) => p,
            Err(SegmenterError::Unimplemented(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut cost_delta = merged_probability * (new_patch_size as f64 + overhead);
        let mut removed_sizes = Vec::with_capacity(removed.len());
        for (removed_condition, glyphs) in &removed {
            let probability = match removed_condition.probability(segments) {
                Ok(p) => p,
                Err(SegmenterError::Unimplemented(_)) => return Ok(None),
                Err(err) => return Err(err),
            };
            removed_sizes.push((probability, glyphs.clone()));
        }
        for (probability, glyphs) in removed_sizes {
            let size = context.patch_size_cache.patch_size(&glyphs)?;
            cost_delta -= probability * (size as f64 + overhead);
        }

        let merged_segment = segments[base_segment_index as usize].clone();
        Ok(Some(CandidateMerge {
            base_segment_index,
            segments_to_merge: SegmentSet::empty(),
            merged_segment,
            new_segment_is_inert: true,
            new_patch_size,
            cost_delta,
            invalidated_glyphs: GlyphSet::empty(),
            kind: MergeKind::Patches { groups },
        }))
    }

    /// Cost delta of moving a condition's glyphs into the initial font: the
    /// patch disappears and the initial font grows.
    ///
    /// With `best_case` set the growth of the initial font is assumed to be
    /// zero, which is cheap to compute and bounds the real delta from below.
    pub(crate) fn compute_init_font_cost_delta(
        context: &mut SegmentationContext,
        init_font_size: u32,
        best_case: bool,
        condition: &ActivationCondition,
        glyphs: &GlyphSet,
    ) -> Result<(f64, GlyphSet), SegmenterError> {
        let overhead = context.merge_strategy.network_overhead_bytes() as f64;
        let probability = condition.probability(context.segmentation_info.segments())?;
        let patch_size = context.patch_size_cache.patch_size(glyphs)?;
        let removed_cost = probability * (patch_size as f64 + overhead);

        let growth = if best_case {
            0.0
        } else {
            let mut init_glyphs = context.segmentation_info.init_font_glyphs().clone();
            init_glyphs.union(glyphs);
            let new_init_size = context
                .patch_size_cache_for_init_font
                .patch_size(&init_glyphs)?;
            new_init_size as f64 - init_font_size as f64
        };

        Ok((growth - removed_cost, glyphs.clone()))
    }

    /// Applies this merge to the context.
    ///
    /// Returns the set of glyphs whose groupings must be recomputed by the
    /// caller. Inert merges update the condition set and groupings directly
    /// and return an empty set.
    pub(crate) fn apply(
        self,
        context: &mut SegmentationContext,
    ) -> Result<GlyphSet, SegmenterError> {
        if let MergeKind::Patches { groups } = self.kind {
            let (first, rest) = groups
                .split_first()
                .ok_or_else(|| SegmenterError::Internal("empty patch combination".to_string()))?;
            for group in rest {
                context.glyph_groupings.combine_patches(first, group)?;
            }
            log::debug!(
                "combined {} patches around segment {} (cost delta {})",
                rest.len() + 1,
                self.base_segment_index,
                self.cost_delta
            );
            return Ok(GlyphSet::empty());
        }

        let size_before = context.segmentation_info.segments()[self.base_segment_index as usize]
            .definition()
            .codepoints
            .len();
        let size_after = context.assign_merged_segment(
            self.base_segment_index,
            &self.segments_to_merge,
            self.merged_segment,
        );
        log::debug!(
            "merged {size_before} codepoints up to {size_after} codepoints for segment {}, \
             new patch size {} bytes, cost delta {}",
            self.base_segment_index,
            self.new_patch_size,
            self.cost_delta
        );

        // The fallback group is fully recomputed by the next grouping pass.
        context
            .glyph_groupings
            .remove_fallback_segments(&self.segments_to_merge);

        // Whether or not the new segment is inert, all information derived
        // from the merged away segments must go.
        context.invalidate_glyph_information(&self.invalidated_glyphs, &self.segments_to_merge);

        if self.new_segment_is_inert {
            // The new segment's glyphs are just the union of the glyphs of
            // the merged segments; build the conditions and groupings
            // directly instead of using closure analysis.
            context.inert_segments.insert(self.base_segment_index);
            for gid in self.invalidated_glyphs.iter() {
                context
                    .glyph_condition_set
                    .add_and_condition(gid, self.base_segment_index);
            }
            context
                .glyph_groupings
                .add_glyphs_to_exclusive_group(self.base_segment_index, &self.invalidated_glyphs)?;

            // Everything is already up to date for these glyphs.
            Ok(GlyphSet::empty())
        } else {
            context.inert_segments.remove(self.base_segment_index);
            Ok(self.invalidated_glyphs)
        }
    }
}

fn would_mix_features_and_codepoints(
    info: &RequestedSegmentationInfo,
    base_segment_index: u32,
    segments: &SegmentSet,
) -> bool {
    let base = info.segments()[base_segment_index as usize].definition();
    let base_codepoints_only = !base.codepoints.is_empty() && base.feature_tags.is_empty();
    let base_features_only = base.codepoints.is_empty() && !base.feature_tags.is_empty();

    if !base_codepoints_only && !base_features_only {
        return false;
    }

    for segment_index in segments.iter() {
        if segment_index == base_segment_index {
            continue;
        }
        let definition = info.segments()[segment_index as usize].definition();
        if base_codepoints_only && !definition.feature_tags.is_empty() {
            return true;
        }
        if base_features_only && !definition.codepoints.is_empty() {
            return true;
        }
    }

    false
}

// Merged segments are activated disjunctively, so
// P(merged) = 1 - (1 - P(s1)) * ... * (1 - P(sn)).
fn merge_segments(
    info: &RequestedSegmentationInfo,
    base_segment_index: u32,
    segments_to_merge: &SegmentSet,
) -> Segment {
    let mut merged = info.segments()[base_segment_index as usize].clone();
    let mut probability_not_matched = 1.0 - merged.probability();
    for segment_index in segments_to_merge.iter() {
        let segment = &info.segments()[segment_index as usize];
        probability_not_matched *= 1.0 - segment.probability();
        merged.definition_mut().union(segment.definition());
    }
    merged.set_probability(1.0 - probability_not_matched);
    merged
}

fn add_condition_and_patch_size(
    context: &mut SegmentationContext,
    condition: &ActivationCondition,
    conditions: &mut BTreeMap<ActivationCondition, u32>,
) -> Result<(), SegmenterError> {
    if conditions.contains_key(condition) {
        return Ok(());
    }

    let glyphs = context
        .glyph_groupings
        .conditions_and_glyphs()
        .get(condition)
        .cloned()
        .ok_or_else(|| {
            SegmenterError::Internal("condition which should be present wasn't found".to_string())
        })?;

    let patch_size = context.patch_size_cache.patch_size(&glyphs)?;
    conditions.insert(condition.clone(), patch_size);
    Ok(())
}

// Cost delta of merging: the new merged patch's cost, minus the cost of every
// condition that disappears, with modified conditions re-added at their new
// probability (their patch size is assumed unchanged).
fn compute_cost_delta(
    context: &mut SegmentationContext,
    merged_segments: &SegmentSet,
    merged_segment: &Segment,
    new_patch_size: u32,
) -> Result<f64, SegmenterError> {
    let per_request_overhead = context.merge_strategy.network_overhead_bytes() as f64;

    // Conditions removed by the merge: triggering segments are a subset of
    // the merged segments. Conditions that intersect but aren't a subset are
    // modified instead.
    let mut removed_conditions: BTreeMap<ActivationCondition, u32> = BTreeMap::new();
    let mut modified_conditions: BTreeMap<ActivationCondition, u32> = BTreeMap::new();

    for segment in merged_segments.iter() {
        for condition in context.glyph_groupings.triggering_segment_to_conditions(segment) {
            if condition.is_fallback() {
                continue;
            }

            let condition_segments = condition.triggering_segments();
            if condition_segments.is_subset_of(merged_segments) {
                add_condition_and_patch_size(context, &condition, &mut removed_conditions)?;
            } else if condition_segments.intersects(merged_segments) {
                add_condition_and_patch_size(context, &condition, &mut modified_conditions)?;
            }
        }
    }

    let mut cost_delta =
        merged_segment.probability() * (new_patch_size as f64 + per_request_overhead);

    let segments = context.segmentation_info.segments();
    for (condition, size) in &removed_conditions {
        cost_delta -= condition.probability(segments)? * (*size as f64 + per_request_overhead);
    }
    for (condition, size) in &modified_conditions {
        cost_delta -= condition.probability(segments)? * (*size as f64 + per_request_overhead);
        cost_delta += condition.merged_probability(
            segments,
            merged_segments,
            merged_segment.probability(),
        )? * (*size as f64 + per_request_overhead);
    }

    Ok(cost_delta)
}
