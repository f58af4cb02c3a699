//! Memoized patch size measurement.

use fnv::FnvHashMap;

use crate::error::SegmenterError;
use crate::glyph_keyed_diff::GlyphKeyedDiff;
use crate::int_set::GlyphSet;

/// Provides the byte size of the patch that would carry a set of glyphs.
///
/// Implementations must be deterministic: equal glyph sets always produce the
/// same size.
pub trait PatchSizeCache {
    fn patch_size(&mut self, gids: &GlyphSet) -> Result<u32, SegmenterError>;
}

/// Measures patch sizes by actually building the brotli compressed patch,
/// memoized by glyph set.
pub struct BrotliPatchSizeCache {
    differ: GlyphKeyedDiff,
    cache: FnvHashMap<GlyphSet, u32>,
    brotli_call_count: u64,
}

impl BrotliPatchSizeCache {
    pub fn new(differ: GlyphKeyedDiff) -> BrotliPatchSizeCache {
        BrotliPatchSizeCache {
            differ,
            cache: Default::default(),
            brotli_call_count: 0,
        }
    }

    pub fn log_brotli_call_count(&self) {
        log::debug!("total number of calls to brotli = {}", self.brotli_call_count);
    }
}

impl PatchSizeCache for BrotliPatchSizeCache {
    fn patch_size(&mut self, gids: &GlyphSet) -> Result<u32, SegmenterError> {
        if let Some(size) = self.cache.get(gids) {
            return Ok(*size);
        }

        self.brotli_call_count += 1;
        let size = self.differ.create_patch(gids)?.len() as u32;
        self.cache.insert(gids.clone(), size);
        Ok(size)
    }
}

/// Estimates the size of a glyph keyed patch using a fixed compression ratio,
/// without running brotli per patch.
///
/// The ratio is measured once by compressing the full glyph data of the font
/// at the highest quality and comparing against the uncompressed size.
pub struct EstimatedPatchSizeCache {
    differ: GlyphKeyedDiff,
    compression_ratio: f64,
    cache: FnvHashMap<GlyphSet, u32>,
}

impl EstimatedPatchSizeCache {
    pub fn new(differ: GlyphKeyedDiff) -> Result<EstimatedPatchSizeCache, SegmenterError> {
        let compression_ratio = Self::estimate_compression_ratio(&differ)?;
        Ok(EstimatedPatchSizeCache {
            differ,
            compression_ratio,
            cache: Default::default(),
        })
    }

    pub fn compression_ratio(&self) -> f64 {
        self.compression_ratio
    }

    fn estimate_compression_ratio(differ: &GlyphKeyedDiff) -> Result<f64, SegmenterError> {
        let glyph_count = differ.glyph_count();
        if glyph_count == 0 {
            return Ok(0.0);
        }

        let mut gids = GlyphSet::empty();
        gids.insert_range(0..=glyph_count - 1);

        let uncompressed_size = differ.total_glyph_data(&gids) as f64;
        if uncompressed_size == 0.0 {
            return Ok(0.0);
        }
        let compressed_size = differ.create_patch_at(&gids, 11)?.len() as f64;

        Ok(compressed_size / uncompressed_size)
    }
}

impl PatchSizeCache for EstimatedPatchSizeCache {
    fn patch_size(&mut self, gids: &GlyphSet) -> Result<u32, SegmenterError> {
        if let Some(size) = self.cache.get(gids) {
            return Ok(*size);
        }

        let glyph_count = gids.len() as u32;
        let table_count = self.differ.table_count();
        let gid_width: u32 = if glyph_count > 255 { 3 } else { 2 };

        let header_size = 1 + 7 * 4;
        let uncompressed_stream_size = 5
            + glyph_count * gid_width                // glyph ids
            + 4 * table_count                        // table tags
            + 4 * (glyph_count * table_count + 1)    // data offsets
            + self.differ.total_glyph_data(gids) as u32;

        let size =
            header_size + (uncompressed_stream_size as f64 * self.compression_ratio) as u32;
        self.cache.insert(gids.clone(), size);
        Ok(size)
    }
}
