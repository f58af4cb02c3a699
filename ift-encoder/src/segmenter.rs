//! Top level driver that produces a glyph segmentation plan for a font.

use read_fonts::FontRef;

use crate::closure::{FontClosure, GlyphClosure};
use crate::error::SegmenterError;
use crate::glyph_keyed_diff::GlyphKeyedDiff;
use crate::glyph_segmentation::GlyphSegmentation;
use crate::int_set::{GlyphSet, SegmentSet};
use crate::merger::{MergeStrategy, Merger};
use crate::patch_size_cache::{BrotliPatchSizeCache, PatchSizeCache};
use crate::segment::Segment;
use crate::segmentation_context::SegmentationContext;
use crate::subset_definition::{add_init_subset_defaults, SubsetDefinition};

/// Computes glyph segmentations driven by closure analysis.
///
/// Given a font and a set of codepoint/feature segments this derives, for
/// every glyph, the conditions under which it is needed, groups glyphs into
/// patches keyed by those conditions, and then iteratively merges segments
/// according to the configured strategy. The resulting plan satisfies the
/// glyph closure requirement for any client subset request.
#[derive(Default)]
pub struct ClosureGlyphSegmenter;

impl ClosureGlyphSegmenter {
    /// Produces a segmentation plan for `font`.
    ///
    /// `initial_segment` describes what the initial font will already
    /// contain. Segments should be ordered by descending usage probability.
    pub fn codepoint_to_glyph_segments(
        &self,
        font: &FontRef,
        initial_segment: SubsetDefinition,
        segments: Vec<Segment>,
        strategy: MergeStrategy,
    ) -> Result<GlyphSegmentation, SegmenterError> {
        let closure = FontClosure::new(font.clone())?;
        let patch_sizes = BrotliPatchSizeCache::new(GlyphKeyedDiff::new(
            font,
            strategy.estimate_compression_quality(),
        )?);
        // Final init font costs use the full quality compressor.
        let init_font_patch_sizes = BrotliPatchSizeCache::new(GlyphKeyedDiff::new(font, 11)?);

        self.segment_with_backends(
            Box::new(closure),
            Box::new(patch_sizes),
            Box::new(init_font_patch_sizes),
            initial_segment,
            segments,
            strategy,
        )
    }

    /// Produces a segmentation plan using caller supplied closure and patch
    /// size backends.
    pub fn segment_with_backends<'a>(
        &self,
        closure: Box<dyn GlyphClosure + 'a>,
        patch_sizes: Box<dyn PatchSizeCache + 'a>,
        init_font_patch_sizes: Box<dyn PatchSizeCache + 'a>,
        mut initial_segment: SubsetDefinition,
        segments: Vec<Segment>,
        strategy: MergeStrategy,
    ) -> Result<GlyphSegmentation, SegmenterError> {
        let glyph_count = closure.glyph_count();
        if glyph_count == 0 {
            return Err(SegmenterError::InvalidArgument(
                "provided font has no glyphs".to_string(),
            ));
        }

        // The initial font always carries the default always included items,
        // factor them into the generated segmentation.
        add_init_subset_defaults(&mut initial_segment);

        let num_segments = segments.len() as u32;
        let mut context = SegmentationContext::new(
            closure,
            patch_sizes,
            init_font_patch_sizes,
            initial_segment,
            segments,
            strategy,
        )?;

        // Generate the initial conditions and groupings by processing all
        // segments and glyphs.
        log::info!("forming initial segmentation plan");
        for segment_index in 0..num_segments {
            context.reprocess_segment(segment_index)?;
        }
        context
            .glyph_closure_cache
            .log_cache_stats("initial segment analysis");

        let mut all_glyphs = GlyphSet::empty();
        all_glyphs.insert_range(0..=glyph_count - 1);
        context.group_glyphs(&all_glyphs)?;
        context.glyph_closure_cache.log_cache_stats("condition grouping");

        if context.merge_strategy.patch_size_min_bytes() == 0
            && !context.merge_strategy.use_costs()
        {
            // No merging will be needed, we're done.
            return context.to_glyph_segmentation();
        }

        let mut inscope_segments = SegmentSet::empty();
        if num_segments > 0 {
            inscope_segments.insert_range(0..=num_segments - 1);
        }
        let mut merger = Merger::new(
            &mut context,
            inscope_segments.clone(),
            inscope_segments,
        )?;

        if context.merge_strategy.enables_init_font_moves() {
            merger.move_segments_to_init_font(&mut context)?;
        }

        // Iteratively merge segments, incrementally reprocessing the affected
        // pieces.
        loop {
            let Some((base_segment_index, modified_gids)) = merger.try_next_merge(&mut context)?
            else {
                break;
            };

            let mut modified_gids = modified_gids;
            if !context.inert_segments.contains(base_segment_index) {
                log::debug!("re-analyzing segment {base_segment_index} after merge");
                modified_gids.union(&context.reprocess_segment(base_segment_index)?);
            }
            context.group_glyphs(&modified_gids)?;
        }

        if cfg!(debug_assertions) {
            // Expensive oracle: the incremental state must match a from
            // scratch recomputation.
            context.validate_incremental_groupings()?;
        }
        context.to_glyph_segmentation()
    }
}
