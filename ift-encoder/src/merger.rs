//! Finds and merges segments/patches in an in progress segmentation.

use std::collections::BTreeMap;

use crate::activation_condition::ActivationCondition;
use crate::candidate_merge::CandidateMerge;
use crate::error::SegmenterError;
use crate::int_set::{GlyphSet, SegmentSet};
use crate::segmentation_context::SegmentationContext;
use crate::subset_definition::add_init_subset_defaults;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StrategyKind {
    None,
    Heuristic,
    Cost,
}

/// Configures how merge operations are selected and performed.
#[derive(Clone, Debug)]
pub struct MergeStrategy {
    kind: StrategyKind,
    patch_size_min_bytes: u32,
    patch_size_max_bytes: u32,
    network_overhead_bytes: u32,
    minimum_group_size: u32,
    optimization_cutoff_fraction: f64,
    init_font_merge_threshold: Option<f64>,
    init_font_merge_probability_threshold: Option<f64>,
    use_patch_merges: bool,
    estimate_compression_quality: u8,
}

impl MergeStrategy {
    /// Perform no merging at all.
    pub fn none() -> MergeStrategy {
        MergeStrategy {
            kind: StrategyKind::None,
            patch_size_min_bytes: 0,
            patch_size_max_bytes: u32::MAX,
            network_overhead_bytes: 0,
            minimum_group_size: 0,
            optimization_cutoff_fraction: 0.0,
            init_font_merge_threshold: None,
            init_font_merge_probability_threshold: None,
            use_patch_merges: false,
            estimate_compression_quality: 9,
        }
    }

    /// Merge segments until every exclusive patch is at least
    /// `patch_size_min_bytes`, never exceeding `patch_size_max_bytes`.
    pub fn heuristic(patch_size_min_bytes: u32, patch_size_max_bytes: u32) -> MergeStrategy {
        MergeStrategy {
            kind: StrategyKind::Heuristic,
            patch_size_min_bytes,
            patch_size_max_bytes,
            ..MergeStrategy::none()
        }
    }

    /// Merge segments whenever doing so lowers the expected transfer cost
    /// `Σ p(c)·(size(c) + overhead)`.
    pub fn cost_based(network_overhead_bytes: u32) -> MergeStrategy {
        MergeStrategy {
            kind: StrategyKind::Cost,
            network_overhead_bytes,
            ..MergeStrategy::none()
        }
    }

    pub fn with_minimum_group_size(mut self, minimum_group_size: u32) -> MergeStrategy {
        self.minimum_group_size = minimum_group_size;
        self
    }

    pub fn with_optimization_cutoff_fraction(mut self, fraction: f64) -> MergeStrategy {
        self.optimization_cutoff_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_init_font_merge_threshold(mut self, threshold: f64) -> MergeStrategy {
        self.init_font_merge_threshold = Some(threshold);
        self
    }

    pub fn with_init_font_merge_probability_threshold(
        mut self,
        threshold: f64,
    ) -> MergeStrategy {
        self.init_font_merge_probability_threshold = Some(threshold);
        self
    }

    pub fn with_patch_merges(mut self, use_patch_merges: bool) -> MergeStrategy {
        self.use_patch_merges = use_patch_merges;
        self
    }

    pub fn with_estimate_compression_quality(mut self, quality: u8) -> MergeStrategy {
        self.estimate_compression_quality = quality;
        self
    }

    pub fn is_none(&self) -> bool {
        self.kind == StrategyKind::None
    }

    pub fn use_costs(&self) -> bool {
        self.kind == StrategyKind::Cost
    }

    pub fn patch_size_min_bytes(&self) -> u32 {
        self.patch_size_min_bytes
    }

    pub fn patch_size_max_bytes(&self) -> u32 {
        self.patch_size_max_bytes
    }

    pub fn network_overhead_bytes(&self) -> u32 {
        self.network_overhead_bytes
    }

    pub fn minimum_group_size(&self) -> u32 {
        self.minimum_group_size
    }

    pub fn optimization_cutoff_fraction(&self) -> f64 {
        self.optimization_cutoff_fraction
    }

    pub fn init_font_merge_threshold(&self) -> Option<f64> {
        self.init_font_merge_threshold
    }

    pub fn init_font_merge_probability_threshold(&self) -> Option<f64> {
        self.init_font_merge_probability_threshold
    }

    pub fn use_patch_merges(&self) -> bool {
        self.use_patch_merges
    }

    pub fn estimate_compression_quality(&self) -> u8 {
        self.estimate_compression_quality
    }

    /// Init font moves only make sense with cost accounting and a configured
    /// acceptance threshold.
    pub fn enables_init_font_moves(&self) -> bool {
        self.use_costs() && self.init_font_merge_threshold.is_some()
    }
}

/// Searches for and applies merges on a subset of the segments of an in
/// progress segmentation.
///
/// Segments are expected to be supplied in descending probability order; the
/// optimization cutoff and the inert candidate pruning rely on it.
pub struct Merger {
    // The segments this merger may touch. Merges never cross this boundary,
    // which supports splitting work by script or shard.
    inscope_segments: SegmentSet,

    // The subset of inscope segments still eligible as merge bases; pruned as
    // each is finished.
    candidate_segments: SegmentSet,

    // Segments under consideration for being moved into the init font.
    inscope_segments_for_init_move: SegmentSet,

    // Segments at or past this index are only selected greedily, not scored
    // exhaustively. Their probability mass is too small to matter.
    optimization_cutoff_segment: u32,
}

impl Merger {
    /// The estimated smallest possible increase in patch size from a merge
    /// (assuming the added glyphs are redundant with the base and cost zero
    /// bytes to encode); roughly the bytes added by one extra gid in the
    /// patch header.
    pub const BEST_CASE_MERGE_SIZE_DELTA: u32 = 6;

    pub fn new(
        context: &mut SegmentationContext,
        inscope_segments: SegmentSet,
        inscope_segments_for_init_move: SegmentSet,
    ) -> Result<Merger, SegmenterError> {
        let mut merger = Merger {
            candidate_segments: Self::compute_candidate_segments(context, &inscope_segments),
            inscope_segments,
            inscope_segments_for_init_move,
            optimization_cutoff_segment: u32::MAX,
        };
        merger.init_optimization_cutoff(context)?;
        Ok(merger)
    }

    fn compute_candidate_segments(
        context: &SegmentationContext,
        inscope_segments: &SegmentSet,
    ) -> SegmentSet {
        let num_segments = context.segmentation_info().segments().len() as u32;
        inscope_segments
            .iter()
            .filter(|s| {
                *s < num_segments
                    && !context.segmentation_info().segments()[*s as usize]
                        .definition()
                        .is_empty()
            })
            .collect()
    }

    pub fn num_inscope_segments(&self) -> usize {
        self.inscope_segments.len()
    }

    /// Searches for a merge to perform and executes it if found. Does not
    /// trigger closure re-analysis of the merged segments.
    ///
    /// If a merge was performed, returns the base segment and the glyphs that
    /// were modified so the caller can update groupings. `None` means there
    /// are no more merges to perform.
    pub fn try_next_merge(
        &mut self,
        context: &mut SegmentationContext,
    ) -> Result<Option<(u32, GlyphSet)>, SegmenterError> {
        if context.merge_strategy.is_none() {
            return Ok(None);
        }

        loop {
            let Some(base_segment_index) = self.candidate_segments.first() else {
                return Ok(None);
            };

            let modified_gids = if context.merge_strategy.use_costs() {
                self.merge_segment_with_costs(context, base_segment_index)?
            } else {
                self.merge_segment_with_heuristic(context, base_segment_index)?
            };

            if let Some(modified_gids) = modified_gids {
                return Ok(Some((base_segment_index, modified_gids)));
            }

            // Finished with this base segment.
            self.candidate_segments.remove(base_segment_index);
        }
    }

    fn apply_candidate(
        &mut self,
        context: &mut SegmentationContext,
        candidate: CandidateMerge,
    ) -> Result<GlyphSet, SegmenterError> {
        self.candidate_segments.subtract(&candidate.segments_to_merge);
        self.candidate_segments.insert(candidate.base_segment_index);
        candidate.apply(context)
    }

    // The greedy cost directed search: evaluate the cost delta of merging the
    // base with every other candidate segment and with the composite
    // conditions that reference it, keeping the candidate with the smallest
    // delta below the baseline.
    fn merge_segment_with_costs(
        &mut self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
    ) -> Result<Option<GlyphSet>, SegmenterError> {
        let base_glyphs = context.glyph_groupings.exclusive_glyphs(base_segment_index);
        if base_glyphs.is_empty() {
            // No exclusive patch, nothing to merge.
            return Ok(None);
        }

        let base_segment = &context.segmentation_info().segments()[base_segment_index as usize];
        let base_probability = base_segment.probability();
        let min_group_size_met =
            base_segment.meets_minimum_group_size(context.merge_strategy.minimum_group_size());

        let mut smallest_candidate: Option<CandidateMerge> = None;
        if min_group_size_met {
            // With the minimum group size satisfied only negative cost deltas
            // are acceptable; the baseline filters out the rest.
            let base_size = context.patch_size_cache.patch_size(&base_glyphs)?;
            smallest_candidate = Some(CandidateMerge::baseline_candidate(
                base_segment_index,
                base_size,
                base_probability,
            ));
        }

        self.collect_exclusive_candidate_merges(
            context,
            base_segment_index,
            &mut smallest_candidate,
        )?;
        self.collect_composite_candidate_merges(
            context,
            base_segment_index,
            &mut smallest_candidate,
        )?;

        let Some(smallest_candidate) = smallest_candidate else {
            return Ok(None);
        };
        if smallest_candidate.is_baseline() {
            // Nothing beat doing nothing.
            return Ok(None);
        }
        if min_group_size_met && smallest_candidate.cost_delta >= 0.0 {
            return Ok(None);
        }

        self.apply_candidate(context, smallest_candidate).map(Some)
    }

    // For an inert merge the lowest possible delta is
    // k·P(base) - P(other)·(base_size + overhead), so any inert candidate
    // whose probability is below this threshold can't beat the current best.
    fn best_case_inert_probability_threshold(
        &self,
        context: &SegmentationContext,
        base_patch_size: u32,
        base_probability: f64,
        lowest_cost_delta: f64,
    ) -> f64 {
        let effective_size =
            (base_patch_size + context.merge_strategy.network_overhead_bytes()) as f64;
        ((Self::BEST_CASE_MERGE_SIZE_DELTA as f64 * base_probability - lowest_cost_delta)
            / effective_size)
            .clamp(0.0, 1.0)
    }

    fn collect_exclusive_candidate_merges(
        &self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
        smallest_candidate: &mut Option<CandidateMerge>,
    ) -> Result<(), SegmenterError> {
        let base_glyphs = context.glyph_groupings.exclusive_glyphs(base_segment_index);
        let base_size = context.patch_size_cache.patch_size(&base_glyphs)?;
        let base_probability = context.segmentation_info().segments()[base_segment_index as usize]
            .probability();

        let mut inert_threshold = -1.0;
        if let Some(candidate) = smallest_candidate.as_ref() {
            inert_threshold = self.best_case_inert_probability_threshold(
                context,
                base_size,
                base_probability,
                candidate.cost_delta,
            );
        }

        let next_segments: Vec<u32> = self
            .candidate_segments
            .iter()
            .filter(|s| *s > base_segment_index)
            .collect();
        for segment_index in next_segments {
            if segment_index >= self.optimization_cutoff_segment && smallest_candidate.is_some() {
                // Past the cutoff we only need at least one candidate, and we
                // already have one.
                return Ok(());
            }

            let probability =
                context.segmentation_info().segments()[segment_index as usize].probability();
            if context.inert_segments.contains(segment_index) && probability <= inert_threshold {
                // Candidates come in descending probability order; once one
                // inert segment fails the threshold all later ones will too.
                break;
            }

            if context
                .glyph_groupings
                .exclusive_glyphs(segment_index)
                .is_empty()
            {
                continue;
            }

            let candidate = CandidateMerge::assess_segment_merge(
                context,
                base_segment_index,
                &SegmentSet::from([segment_index]),
            )?;
            if let Some(candidate) = candidate {
                if smallest_candidate
                    .as_ref()
                    .is_none_or(|smallest| candidate.cost_delta < smallest.cost_delta)
                {
                    inert_threshold = self.best_case_inert_probability_threshold(
                        context,
                        base_size,
                        base_probability,
                        candidate.cost_delta,
                    );
                    *smallest_candidate = Some(candidate);
                }
            }
        }

        Ok(())
    }

    fn collect_composite_candidate_merges(
        &self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
        smallest_candidate: &mut Option<CandidateMerge>,
    ) -> Result<(), SegmenterError> {
        if base_segment_index >= self.optimization_cutoff_segment {
            return Ok(());
        }

        // Snapshot the composite conditions; assessment mutates the caches.
        let conditions: Vec<ActivationCondition> = context
            .glyph_groupings
            .conditions_and_glyphs()
            .keys()
            .filter(|c| !c.is_exclusive() && !c.is_fallback())
            .cloned()
            .collect();

        for condition in conditions {
            let triggering_segments = condition.triggering_segments();

            if triggering_segments
                .first()
                .is_some_and(|min| min >= self.optimization_cutoff_segment)
            {
                // Every triggering segment is past the cutoff; the
                // probability here is too low to matter.
                continue;
            }

            if !triggering_segments.intersects(&self.candidate_segments)
                || !triggering_segments.is_subset_of(&self.inscope_segments)
            {
                // Needs at least one active segment (otherwise this condition
                // was already considered and rejected) and must not cross the
                // merge group boundary.
                continue;
            }

            let candidate = CandidateMerge::assess_segment_merge(
                context,
                base_segment_index,
                &triggering_segments,
            )?;
            if let Some(candidate) = candidate {
                if smallest_candidate
                    .as_ref()
                    .is_none_or(|smallest| candidate.cost_delta < smallest.cost_delta)
                {
                    *smallest_candidate = Some(candidate);
                }
            }

            if context.merge_strategy.use_patch_merges() && condition.conditions().len() == 1 {
                // For disjunctive composite conditions also consider just
                // combining the patches, leaving the segments alone.
                let candidate =
                    CandidateMerge::assess_patch_merge(context, base_segment_index, &condition)?;
                if let Some(candidate) = candidate {
                    if smallest_candidate
                        .as_ref()
                        .is_none_or(|smallest| candidate.cost_delta < smallest.cost_delta)
                    {
                        *smallest_candidate = Some(candidate);
                    }
                }
            }
        }

        Ok(())
    }

    fn merge_segment_with_heuristic(
        &mut self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
    ) -> Result<Option<GlyphSet>, SegmenterError> {
        let base_glyphs = context.glyph_groupings.exclusive_glyphs(base_segment_index);
        if base_glyphs.is_empty()
            || !CandidateMerge::is_patch_too_small(context, base_segment_index, &base_glyphs)?
        {
            // Patch is big enough, no merge needed.
            return Ok(None);
        }

        if let Some(modified_gids) =
            self.try_merging_a_composite_condition(context, base_segment_index)?
        {
            return Ok(Some(modified_gids));
        }

        if let Some(modified_gids) = self.try_merging_a_base_segment(context, base_segment_index)? {
            return Ok(Some(modified_gids));
        }

        log::debug!(
            "unable to get segment {base_segment_index} above minimum size, continuing to next \
             segment"
        );
        Ok(None)
    }

    // Searches for a composite condition containing the base segment whose
    // triggering segments can be merged into it.
    fn try_merging_a_composite_condition(
        &mut self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
    ) -> Result<Option<GlyphSet>, SegmenterError> {
        let candidate_conditions = context
            .glyph_groupings
            .triggering_segment_to_conditions(base_segment_index);
        let base_condition = ActivationCondition::exclusive_segment(base_segment_index, u32::MAX);

        for next_condition in candidate_conditions {
            if next_condition.is_fallback() {
                // Merging the fallback would merge every segment into one.
                continue;
            }

            if next_condition < base_condition {
                // Everything before the base condition is already processed.
                continue;
            }

            let triggering_segments = next_condition.triggering_segments();
            if !triggering_segments.contains(base_segment_index)
                || !triggering_segments.is_subset_of(&self.inscope_segments)
            {
                continue;
            }

            if let Some(modified_gids) =
                self.try_merge(context, base_segment_index, &triggering_segments)?
            {
                log::debug!(
                    "merging composite condition segments into segment {base_segment_index}"
                );
                return Ok(Some(modified_gids));
            }
        }

        Ok(None)
    }

    // Merges the next candidate segment after base that fits under the
    // maximum patch size.
    fn try_merging_a_base_segment(
        &mut self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
    ) -> Result<Option<GlyphSet>, SegmenterError> {
        let next_segments: Vec<u32> = self
            .candidate_segments
            .iter()
            .filter(|s| *s > base_segment_index)
            .collect();

        for segment_index in next_segments {
            if let Some(modified_gids) = self.try_merge(
                context,
                base_segment_index,
                &SegmentSet::from([segment_index]),
            )? {
                log::debug!(
                    "merging segment {segment_index} into segment {base_segment_index}"
                );
                return Ok(Some(modified_gids));
            }
        }

        Ok(None)
    }

    fn try_merge(
        &mut self,
        context: &mut SegmentationContext,
        base_segment_index: u32,
        to_merge_segments: &SegmentSet,
    ) -> Result<Option<GlyphSet>, SegmenterError> {
        let Some(candidate) =
            CandidateMerge::assess_segment_merge(context, base_segment_index, to_merge_segments)?
        else {
            return Ok(None);
        };
        self.apply_candidate(context, candidate).map(Some)
    }

    fn init_optimization_cutoff(
        &mut self,
        context: &mut SegmentationContext,
    ) -> Result<(), SegmenterError> {
        if !context.merge_strategy.use_costs() {
            return Ok(());
        }

        self.optimization_cutoff_segment = self.compute_segment_cutoff(context)?;
        if (self.optimization_cutoff_segment as usize)
            < context.segmentation_info().segments().len()
        {
            log::debug!(
                "cutting off optimization at segment {}",
                self.optimization_cutoff_segment
            );
        }
        Ok(())
    }

    // Finds the first segment (by ascending index, so descending probability)
    // whose cumulative tail cost falls below the configured fraction of the
    // total cost. Only exclusive patches are considered; this is a rough
    // cutoff, not an exact one.
    fn compute_segment_cutoff(
        &self,
        context: &mut SegmentationContext,
    ) -> Result<u32, SegmenterError> {
        let overhead = context.merge_strategy.network_overhead_bytes() as f64;

        let mut total_cost = 0.0;
        for segment_index in self.candidate_segments.iter() {
            let glyphs = context.glyph_groupings.exclusive_glyphs(segment_index);
            if glyphs.is_empty() {
                continue;
            }
            let size = context.patch_size_cache.patch_size(&glyphs)? as f64;
            let probability =
                context.segmentation_info().segments()[segment_index as usize].probability();
            total_cost += probability * (size + overhead);
        }

        let mut cutoff_tail_cost =
            total_cost * context.merge_strategy.optimization_cutoff_fraction();
        let mut previous_segment_index = u32::MAX;
        let tail_first: Vec<u32> = self.candidate_segments.iter().rev().collect();
        for segment_index in tail_first {
            let glyphs = context.glyph_groupings.exclusive_glyphs(segment_index);
            if glyphs.is_empty() {
                continue;
            }
            let size = context.patch_size_cache.patch_size(&glyphs)? as f64;
            let probability =
                context.segmentation_info().segments()[segment_index as usize].probability();
            cutoff_tail_cost -= probability * (size + overhead);
            if cutoff_tail_cost < 0.0 {
                // This segment puts us above the cutoff, so the cutoff is the
                // previous one.
                return Ok(previous_segment_index);
            }
            previous_segment_index = segment_index;
        }

        Ok(previous_segment_index)
    }

    fn cutoff_segments(&self, context: &SegmentationContext) -> SegmentSet {
        let num_segments = context.segmentation_info().segments().len() as u32;
        let start = self.optimization_cutoff_segment;
        if num_segments == 0 || start > num_segments - 1 {
            return SegmentSet::empty();
        }

        let mut result = SegmentSet::empty();
        result.insert_range(start..=num_segments - 1);
        result.intersect(&self.inscope_segments);
        result
    }

    /// Moves segments into the initial font when doing so lowers the expected
    /// cost below the configured threshold.
    ///
    /// The common case is a segment with probability 1.0: it is always
    /// needed, so carrying it as a patch only costs overhead.
    ///
    /// Processing happens in two phases. First, batch mode checks only inert
    /// segments; these don't interact through the closure so several can be
    /// moved in one operation without re-analysis. Then the remaining
    /// candidates are checked and moved one at a time, re-analyzing after
    /// each move.
    pub fn move_segments_to_init_font(
        &mut self,
        context: &mut SegmentationContext,
    ) -> Result<(), SegmenterError> {
        let Some(merge_threshold) = context.merge_strategy.init_font_merge_threshold() else {
            return Err(SegmenterError::FailedPrecondition(
                "cannot move segments without an init font merge threshold".to_string(),
            ));
        };

        log::debug!("checking for segments to move into the initial font");
        let inscope = self.init_font_apply_probability_threshold(context);

        let mut batch_mode = true;
        loop {
            let to_check = self.init_font_segments_to_check(context, &inscope);

            let init_glyphs = context.segmentation_info().init_font_glyphs().clone();
            let init_font_size = context
                .patch_size_cache_for_init_font
                .patch_size(&init_glyphs)?;

            let mut total_delta = 0.0;
            let mut lowest_delta = merge_threshold;
            let mut segments_to_move: Option<SegmentSet> = None;

            let conditions = self.init_font_conditions_to_check(context, &to_check, batch_mode);
            for (condition, glyphs) in conditions {
                // Filter by the best case first, it is much cheaper to
                // compute.
                let (best_case_delta, _) = CandidateMerge::compute_init_font_cost_delta(
                    context,
                    init_font_size,
                    true,
                    &condition,
                    &glyphs,
                )?;
                if best_case_delta >= lowest_delta {
                    continue;
                }

                let (delta, _) = CandidateMerge::compute_init_font_cost_delta(
                    context,
                    init_font_size,
                    false,
                    &condition,
                    &glyphs,
                )?;
                if delta >= lowest_delta {
                    continue;
                }

                let triggering_segments = condition.triggering_segments();
                if batch_mode {
                    // Accept everything under the threshold in one pass.
                    total_delta += delta;
                    segments_to_move
                        .get_or_insert_with(SegmentSet::empty)
                        .union(&triggering_segments);
                } else {
                    lowest_delta = delta;
                    total_delta = delta;
                    segments_to_move = Some(triggering_segments);
                }
            }

            let Some(segments_to_move) = segments_to_move else {
                if batch_mode {
                    // Batch processing done, switch to checking individually.
                    log::debug!("switching to individual init font move checks");
                    batch_mode = false;
                    continue;
                }
                break;
            };

            self.apply_init_font_move(context, &segments_to_move, total_delta)?;
        }

        log::debug!(
            "initial font now has {} codepoints",
            context
                .segmentation_info()
                .init_font_segment()
                .codepoints
                .len()
        );
        Ok(())
    }

    fn init_font_apply_probability_threshold(
        &self,
        context: &SegmentationContext,
    ) -> SegmentSet {
        let mut inscope = self.inscope_segments_for_init_move.clone();
        if let Some(threshold) = context.merge_strategy.init_font_merge_probability_threshold() {
            let below_threshold: SegmentSet = inscope
                .iter()
                .filter(|s| {
                    context.segmentation_info().segments()[*s as usize].probability() < threshold
                })
                .collect();
            log::debug!(
                "{} inscope segments, {} below the init move probability threshold",
                inscope.len(),
                below_threshold.len()
            );
            inscope.subtract(&below_threshold);
        }
        inscope
    }

    fn init_font_segments_to_check(
        &self,
        context: &SegmentationContext,
        inscope: &SegmentSet,
    ) -> SegmentSet {
        let mut to_check = inscope.clone();
        // Shared segments aren't subject to the optimization cutoff, so only
        // exclude cutoff segments that belong to this merger.
        let mut excluded = self.cutoff_segments(context);
        excluded.intersect(&self.inscope_segments);
        to_check.subtract(&excluded);
        to_check
    }

    // Move candidates are the exclusive conditions of the segments in
    // `to_check`; in batch mode only inert segments qualify.
    fn init_font_conditions_to_check(
        &self,
        context: &SegmentationContext,
        to_check: &SegmentSet,
        batch_mode: bool,
    ) -> BTreeMap<ActivationCondition, GlyphSet> {
        let mut conditions = BTreeMap::new();
        for segment_index in to_check.iter() {
            if batch_mode && !context.inert_segments.contains(segment_index) {
                continue;
            }

            let condition = ActivationCondition::exclusive_segment(segment_index, 0);
            if let Some(glyphs) = context
                .glyph_groupings
                .conditions_and_glyphs()
                .get(&condition)
            {
                conditions.insert(condition, glyphs.clone());
            }
        }
        conditions
    }

    fn apply_init_font_move(
        &mut self,
        context: &mut SegmentationContext,
        segments_to_move: &SegmentSet,
        delta: f64,
    ) -> Result<(), SegmenterError> {
        log::debug!(
            "moving {} segments into the initial font (cost delta = {delta})",
            segments_to_move.len()
        );

        let mut initial_segment = context
            .segmentation_info()
            .init_font_segment_without_defaults();
        for segment_index in segments_to_move.iter() {
            initial_segment.union(
                context.segmentation_info().segments()[segment_index as usize].definition(),
            );
        }
        add_init_subset_defaults(&mut initial_segment);

        context.reassign_init_subset(initial_segment, segments_to_move)?;
        self.reassign_init_subset(context)
    }

    /// Recomputes this merger's state after the context's init subset was
    /// reconfigured.
    pub fn reassign_init_subset(
        &mut self,
        context: &mut SegmentationContext,
    ) -> Result<(), SegmenterError> {
        self.candidate_segments = Self::compute_candidate_segments(context, &self.inscope_segments);
        self.init_optimization_cutoff(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::subset_definition::SubsetDefinition;
    use crate::testdata::{scripted_gid, FixedPatchSizeCache, ScriptedFont};

    fn cp(c: char) -> u32 {
        c as u32
    }

    fn all_segments(count: u32) -> SegmentSet {
        let mut set = SegmentSet::empty();
        set.insert_range(0..=count - 1);
        set
    }

    fn analyzed_context(
        segments: Vec<Segment>,
        sizes: FixedPatchSizeCache,
        strategy: MergeStrategy,
    ) -> SegmentationContext<'static> {
        analyzed_context_with_init_sizes(segments, sizes, FixedPatchSizeCache::new(1), strategy)
    }

    fn analyzed_context_with_init_sizes(
        segments: Vec<Segment>,
        sizes: FixedPatchSizeCache,
        init_sizes: FixedPatchSizeCache,
        strategy: MergeStrategy,
    ) -> SegmentationContext<'static> {
        let count = segments.len() as u32;
        let mut context = SegmentationContext::new(
            Box::new(ScriptedFont::new(30)),
            Box::new(sizes),
            Box::new(init_sizes),
            SubsetDefinition::default(),
            segments,
            strategy,
        )
        .unwrap();
        let mut changed = GlyphSet::empty();
        for segment in 0..count {
            changed.union(&context.reprocess_segment(segment).unwrap());
        }
        context.group_glyphs(&changed).unwrap();
        context
    }

    fn drive_merger(context: &mut SegmentationContext, merger: &mut Merger) {
        loop {
            let Some((base, modified_gids)) = merger.try_next_merge(context).unwrap() else {
                break;
            };
            let mut modified_gids = modified_gids;
            if !context.inert_segments().contains(base) {
                modified_gids.union(&context.reprocess_segment(base).unwrap());
            }
            context.group_glyphs(&modified_gids).unwrap();
        }
    }

    #[test]
    fn none_strategy_never_merges() {
        let mut context = analyzed_context(
            vec![
                Segment::from_codepoints([cp('a')], 0.9),
                Segment::from_codepoints([cp('b')], 0.8),
            ],
            FixedPatchSizeCache::new(100),
            MergeStrategy::none(),
        );
        let mut merger = Merger::new(&mut context, all_segments(2), SegmentSet::empty()).unwrap();
        assert!(merger.try_next_merge(&mut context).unwrap().is_none());
    }

    #[test]
    fn heuristic_merges_until_minimum_size() {
        // Sizes per segment: 700, 500, 400, 900. With a 2048 byte minimum the
        // merger folds segments into s0 until it reaches 2500 bytes.
        let sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 700)
            .with_weight(scripted_gid('b'), 500)
            .with_weight(scripted_gid('c'), 400)
            .with_weight(scripted_gid('d'), 900);
        let mut context = analyzed_context(
            vec![
                Segment::from_codepoints([cp('a')], 0.9),
                Segment::from_codepoints([cp('b')], 0.6),
                Segment::from_codepoints([cp('c')], 0.3),
                Segment::from_codepoints([cp('d')], 0.1),
            ],
            sizes,
            MergeStrategy::heuristic(2048, 4096),
        );
        let mut merger = Merger::new(&mut context, all_segments(4), SegmentSet::empty()).unwrap();
        drive_merger(&mut context, &mut merger);

        // All four segments merged into s0.
        assert_eq!(
            context.glyph_groupings.exclusive_glyphs(0),
            GlyphSet::from([
                scripted_gid('a'),
                scripted_gid('b'),
                scripted_gid('c'),
                scripted_gid('d')
            ])
        );
        for segment in 1..4 {
            assert!(context.segmentation_info().segments()[segment]
                .definition()
                .is_empty());
        }

        context.validate_incremental_groupings().unwrap();
        let segmentation = context.to_glyph_segmentation().unwrap();
        assert_eq!(segmentation.patches().len(), 1);
        assert_eq!(segmentation.segments().len(), 4);
    }

    #[test]
    fn heuristic_respects_maximum_size() {
        // s0 (700) can absorb s1 (500) but not s3 (900, would exceed 4096
        // after s2) if the cap is 1500.
        let sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 700)
            .with_weight(scripted_gid('b'), 500)
            .with_weight(scripted_gid('c'), 900);
        let mut context = analyzed_context(
            vec![
                Segment::from_codepoints([cp('a')], 0.9),
                Segment::from_codepoints([cp('b')], 0.6),
                Segment::from_codepoints([cp('c')], 0.3),
            ],
            sizes,
            MergeStrategy::heuristic(5000, 1500),
        );
        let mut merger = Merger::new(&mut context, all_segments(3), SegmentSet::empty()).unwrap();
        drive_merger(&mut context, &mut merger);

        // s1 merged into s0 (1200 <= 1500); s2 would push past the cap so it
        // stays separate even though the minimum was never reached.
        assert_eq!(
            context.glyph_groupings.exclusive_glyphs(0),
            GlyphSet::from([scripted_gid('a'), scripted_gid('b')])
        );
        assert_eq!(
            context.glyph_groupings.exclusive_glyphs(2),
            GlyphSet::from([scripted_gid('c')])
        );
    }

    #[test]
    fn cost_strategy_rejects_positive_deltas() {
        // Low overhead: merging only increases expected cost, so nothing
        // merges.
        let sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 400)
            .with_weight(scripted_gid('b'), 300)
            .with_weight(scripted_gid('c'), 100)
            .with_weight(scripted_gid('d'), 50);
        let mut context = analyzed_context(
            vec![
                Segment::from_codepoints([cp('a')], 0.9),
                Segment::from_codepoints([cp('b')], 0.6),
                Segment::from_codepoints([cp('c')], 0.2),
                Segment::from_codepoints([cp('d')], 0.05),
            ],
            sizes,
            MergeStrategy::cost_based(75),
        );
        let mut merger = Merger::new(&mut context, all_segments(4), SegmentSet::empty()).unwrap();
        drive_merger(&mut context, &mut merger);

        for segment in 0..4u32 {
            assert_eq!(
                context.glyph_groupings.exclusive_glyphs(segment).len(),
                1,
                "segment {segment} should not have been merged"
            );
        }
    }

    #[test]
    fn cost_strategy_accepts_negative_deltas() {
        // Huge per request overhead: merging everything into one patch is
        // cheaper than paying overhead per segment.
        let sizes = FixedPatchSizeCache::new(10);
        let mut context = analyzed_context(
            vec![
                Segment::from_codepoints([cp('a')], 0.9),
                Segment::from_codepoints([cp('b')], 0.85),
                Segment::from_codepoints([cp('c')], 0.8),
            ],
            sizes,
            MergeStrategy::cost_based(1000),
        );

        let baseline_cost = 0.9 * 1010.0 + 0.85 * 1010.0 + 0.8 * 1010.0;
        let mut merger = Merger::new(&mut context, all_segments(3), SegmentSet::empty()).unwrap();
        drive_merger(&mut context, &mut merger);

        // Everything merged into s0.
        assert_eq!(context.glyph_groupings.exclusive_glyphs(0).len(), 3);

        // Total cost strictly decreased.
        let merged_probability = 1.0 - (1.0 - 0.9) * (1.0 - 0.85) * (1.0 - 0.8);
        let merged_cost = merged_probability * 1030.0;
        assert!(merged_cost < baseline_cost);

        context.validate_incremental_groupings().unwrap();
        context.to_glyph_segmentation().unwrap();
    }

    #[test]
    fn patch_merge_is_chosen_when_cheapest() {
        // The alternate glyph 30 is disjunctive on segments 0 and 1, and 31
        // on segments 0 and 2. Combining the {0, 1} patches avoids changing
        // the probability of the {0, 2} condition, which any segment merge
        // would, so with patch merging enabled it has the smallest delta.
        let font = ScriptedFont::new(40)
            .with_alternate(&[cp('a'), cp('b')], 30)
            .with_alternate(&[cp('a'), cp('c')], 31);
        let mut context = SegmentationContext::new(
            Box::new(font),
            Box::new(FixedPatchSizeCache::new(10)),
            Box::new(FixedPatchSizeCache::new(10)),
            SubsetDefinition::default(),
            vec![
                Segment::from_codepoints([cp('a')], 0.9),
                Segment::from_codepoints([cp('b')], 0.8),
                Segment::from_codepoints([cp('c')], 0.5),
            ],
            MergeStrategy::cost_based(1000).with_patch_merges(true),
        )
        .unwrap();
        let mut changed = GlyphSet::empty();
        for segment in 0..3 {
            changed.union(&context.reprocess_segment(segment).unwrap());
        }
        let mut all = GlyphSet::empty();
        all.insert_range(0..=39);
        context.group_glyphs(&all).unwrap();

        let mut merger = Merger::new(&mut context, all_segments(3), SegmentSet::empty()).unwrap();
        let (base, modified_gids) = merger.try_next_merge(&mut context).unwrap().unwrap();
        context.group_glyphs(&modified_gids).unwrap();

        // A patch combination was applied: segment definitions are untouched
        // and the {0, 1} patches now form one combined patch.
        assert_eq!(base, 0);
        assert!(modified_gids.is_empty());
        for segment in 0..3usize {
            assert!(!context.segmentation_info().segments()[segment]
                .definition()
                .is_empty());
        }
        assert_eq!(
            context
                .glyph_groupings
                .conditions_and_glyphs()
                .get(&ActivationCondition::or_segments(
                    &SegmentSet::from([0, 1]),
                    0
                )),
            Some(&GlyphSet::from([
                scripted_gid('a'),
                scripted_gid('b'),
                30
            ]))
        );
        assert_eq!(context.glyph_groupings.exclusive_glyphs(0), GlyphSet::empty());
        assert_eq!(context.glyph_groupings.exclusive_glyphs(1), GlyphSet::empty());

        context.to_glyph_segmentation().unwrap();
    }

    #[test]
    fn move_segments_to_init_font_requires_threshold() {
        let mut context = analyzed_context(
            vec![Segment::from_codepoints([cp('a')], 1.0)],
            FixedPatchSizeCache::new(100),
            MergeStrategy::cost_based(75),
        );
        let mut merger = Merger::new(&mut context, all_segments(1), all_segments(1)).unwrap();
        assert!(matches!(
            merger.move_segments_to_init_font(&mut context),
            Err(SegmenterError::FailedPrecondition(_))
        ));
    }

    #[test]
    fn move_certain_segment_to_init_font() {
        // s0 has probability 1.0; its patch costs 300 + 75 overhead on every
        // load while growing the initial font only costs the 300 bytes, so
        // moving it is a win. s1 is unlikely enough that its expected patch
        // cost is far below its init font growth.
        let sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 300)
            .with_weight(scripted_gid('b'), 200);
        let init_sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 300)
            .with_weight(scripted_gid('b'), 200);
        let mut context = analyzed_context_with_init_sizes(
            vec![
                Segment::from_codepoints([cp('a')], 1.0),
                Segment::from_codepoints([cp('b')], 0.1),
            ],
            sizes,
            init_sizes,
            MergeStrategy::cost_based(75).with_init_font_merge_threshold(0.0),
        );
        let mut merger = Merger::new(&mut context, all_segments(2), all_segments(2)).unwrap();
        merger.move_segments_to_init_font(&mut context).unwrap();

        // s0's codepoints are now part of the initial font subset.
        assert!(context
            .segmentation_info()
            .init_font_segment_without_defaults()
            .codepoints
            .contains(cp('a')));
        assert!(context.segmentation_info().segments()[0]
            .definition()
            .is_empty());
        assert!(context
            .segmentation_info()
            .init_font_glyphs()
            .contains(scripted_gid('a')));
        assert_eq!(context.glyph_groupings.exclusive_glyphs(0), GlyphSet::empty());

        // s1 is too unlikely to be worth moving.
        assert!(!context.segmentation_info().segments()[1]
            .definition()
            .is_empty());

        let segmentation = context.to_glyph_segmentation().unwrap();
        assert!(segmentation
            .init_font_glyphs()
            .contains(scripted_gid('a')));
    }

    #[test]
    fn probability_threshold_excludes_unlikely_segments() {
        let sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 300)
            .with_weight(scripted_gid('b'), 300);
        let init_sizes = FixedPatchSizeCache::new(0)
            .with_weight(scripted_gid('a'), 300)
            .with_weight(scripted_gid('b'), 300);
        let mut context = analyzed_context_with_init_sizes(
            vec![
                Segment::from_codepoints([cp('a')], 1.0),
                Segment::from_codepoints([cp('b')], 0.5),
            ],
            sizes,
            init_sizes,
            MergeStrategy::cost_based(75)
                .with_init_font_merge_threshold(0.0)
                .with_init_font_merge_probability_threshold(0.9),
        );
        let mut merger = Merger::new(&mut context, all_segments(2), all_segments(2)).unwrap();
        merger.move_segments_to_init_font(&mut context).unwrap();

        // Only the certain segment moved; s1 was below the probability
        // threshold even though its move delta would have been negative.
        assert!(context.segmentation_info().segments()[0]
            .definition()
            .is_empty());
        assert!(!context.segmentation_info().segments()[1]
            .definition()
            .is_empty());
    }
}
