//! Memoized glyph closures and the closure driven segment analysis.

use fnv::FnvHashMap;

use crate::closure::GlyphClosure;
use crate::error::SegmenterError;
use crate::int_set::{GlyphSet, SegmentSet};
use crate::segmentation_info::RequestedSegmentationInfo;
use crate::subset_definition::SubsetDefinition;

/// Result of analyzing the closure behaviour of a set of segments.
///
/// See [`GlyphClosureCache::analyze_segment`].
pub struct SegmentAnalysis {
    /// Glyphs needing the analyzed segments plus at least one more segment.
    pub and_gids: GlyphSet,
    /// Glyphs reachable through the analyzed segments or some other segment.
    pub or_gids: GlyphSet,
    /// Glyphs reachable only through the analyzed segments.
    pub exclusive_gids: GlyphSet,
}

/// A cache of the results of glyph closure on a specific font face.
pub struct GlyphClosureCache<'a> {
    provider: Box<dyn GlyphClosure + 'a>,
    glyph_count: u32,
    cache: FnvHashMap<SubsetDefinition, GlyphSet>,
    cache_hits: u64,
    cache_misses: u64,
}

impl<'a> GlyphClosureCache<'a> {
    pub fn new(provider: Box<dyn GlyphClosure + 'a>) -> GlyphClosureCache<'a> {
        GlyphClosureCache {
            glyph_count: provider.glyph_count(),
            provider,
            cache: Default::default(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    pub fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses
    }

    pub fn log_cache_stats(&self, label: &str) {
        log::debug!(
            "{label}: glyph closure cache hits = {}, misses = {}",
            self.cache_hits,
            self.cache_misses
        );
    }

    /// The memoized glyph closure of `definition`.
    pub fn glyph_closure(
        &mut self,
        definition: &SubsetDefinition,
    ) -> Result<GlyphSet, SegmenterError> {
        if let Some(closure) = self.cache.get(definition) {
            self.cache_hits += 1;
            return Ok(closure.clone());
        }

        self.cache_misses += 1;
        let closure = self.provider.glyph_closure(definition)?;
        self.cache.insert(definition.clone(), closure.clone());
        Ok(closure)
    }

    /// Determines the closure conditions attached to `segment_ids`.
    ///
    /// This tests various closures using the segment definitions to determine
    /// what conditions are present for the inclusion of closure glyphs. At a
    /// high level, where s is the union of the segments being tested:
    ///
    /// * Set A: glyph closure of the union of all segments (precomputed).
    /// * Set B: glyph closure of the union of all segments except for s.
    /// * Set I: glyph closure of (initial subset ∪ s) minus the initial
    ///   closure.
    /// * Set D: A - B, the glyphs that are dropped when s is removed.
    ///
    /// Then:
    /// * D - I: activation condition for these glyphs is s AND one or more
    ///   additional segments.
    /// * I - D: activation condition is s OR one or more additional segments.
    /// * D ∩ I: these glyphs activate only through s.
    pub fn analyze_segment(
        &mut self,
        info: &RequestedSegmentationInfo,
        segment_ids: &SegmentSet,
    ) -> Result<SegmentAnalysis, SegmenterError> {
        if segment_ids.is_empty() {
            return Ok(SegmentAnalysis {
                and_gids: GlyphSet::empty(),
                or_gids: GlyphSet::empty(),
                exclusive_gids: GlyphSet::empty(),
            });
        }

        let num_segments = info.segments().len() as u32;
        if segment_ids.last().is_some_and(|last| last >= num_segments) {
            return Err(SegmenterError::InvalidArgument(format!(
                "segment index {} is out of bounds",
                segment_ids.last().unwrap()
            )));
        }

        // The subset definition of the union of segment_ids.
        let mut combined = SubsetDefinition::default();
        for segment in segment_ids.iter() {
            combined.union(info.segments()[segment as usize].definition());
        }

        let except_segment = compute_except_segment(info, segment_ids, &combined);
        let b_except_segment_closure = self.glyph_closure(&except_segment)?;

        let mut only_segment = combined;
        only_segment.union(info.init_font_segment());
        let mut i_only_segment_closure = self.glyph_closure(&only_segment)?;
        i_only_segment_closure.subtract(info.init_font_glyphs());

        let mut d_dropped = info.full_closure().clone();
        d_dropped.subtract(&b_except_segment_closure);

        let mut and_gids = d_dropped.clone();
        and_gids.subtract(&i_only_segment_closure);

        let mut or_gids = i_only_segment_closure.clone();
        or_gids.subtract(&d_dropped);

        let mut exclusive_gids = i_only_segment_closure;
        exclusive_gids.intersect(&d_dropped);

        Ok(SegmentAnalysis {
            and_gids,
            or_gids,
            exclusive_gids,
        })
    }

    /// Returns only the disjunctively activated glyphs of `segment_ids`.
    pub fn codepoints_to_or_gids(
        &mut self,
        info: &RequestedSegmentationInfo,
        segment_ids: &SegmentSet,
    ) -> Result<GlyphSet, SegmenterError> {
        Ok(self.analyze_segment(info, segment_ids)?.or_gids)
    }
}

/// Generates the subset definition that contains all segments except for those
/// listed in `segment_ids`.
fn compute_except_segment(
    info: &RequestedSegmentationInfo,
    segment_ids: &SegmentSet,
    combined: &SubsetDefinition,
) -> SubsetDefinition {
    if info.segments_are_disjoint()
        && (segment_ids.len() == 1 || segment_ids.len() < info.segments().len() / 2)
    {
        // Cheaper path for the common case of disjoint input segments and a
        // smallish id set: the union of everything minus the combined
        // definition.
        let mut except_segment = info.full_definition().clone();
        except_segment.subtract(combined);
        return except_segment;
    }

    // This always works, even with non disjoint segments.
    let mut except_segment = info.init_font_segment().clone();
    for (index, segment) in info.segments().iter().enumerate() {
        if !segment_ids.contains(index as u32) {
            except_segment.union(segment.definition());
        }
    }
    except_segment
}
