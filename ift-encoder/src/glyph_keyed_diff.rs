//! Generates glyph keyed patch bytes for size measurement.
//!
//! Glyph keyed patches (<https://w3c.github.io/IFT/Overview.html#glyph-keyed>)
//! carry brotli compressed per glyph data blobs for the glyph data tables.
//! The planner only needs the byte sizes of these patches, so this builds the
//! patch data stream from the font's glyf and gvar tables and compresses it at
//! a configurable quality. CFF outlines are not handled here.

use std::io::Write;

use brotlic::{BrotliEncoderOptions, CompressorWriter, Quality};
use font_types::Tag;
use read_fonts::{FontRef, TableProvider};

use crate::error::SegmenterError;
use crate::int_set::GlyphSet;

const GLYF: Tag = Tag::new(b"glyf");
const GVAR: Tag = Tag::new(b"gvar");

/// Per glyph data blobs of one font table.
pub(crate) struct GlyphDataTable {
    tag: Tag,
    data: Vec<u8>,
    // Byte offsets into data, one entry per glyph plus a trailing end offset.
    offsets: Vec<u32>,
}

impl GlyphDataTable {
    fn glyph_data(&self, gid: u32) -> &[u8] {
        let start = self.offsets[gid as usize] as usize;
        let end = self.offsets[gid as usize + 1] as usize;
        self.data.get(start..end).unwrap_or_default()
    }
}

/// Builds glyph keyed patches for a font at a fixed brotli quality.
pub struct GlyphKeyedDiff {
    quality: u8,
    glyph_count: u32,
    tables: Vec<GlyphDataTable>,
}

impl GlyphKeyedDiff {
    pub fn new(font: &FontRef, quality: u8) -> Result<GlyphKeyedDiff, SegmenterError> {
        let glyph_count = font.maxp()?.num_glyphs() as u32;

        let mut tables = Vec::new();
        if let Some(table) = glyf_data_table(font, glyph_count)? {
            tables.push(table);
        }
        if let Some(table) = gvar_data_table(font, glyph_count)? {
            tables.push(table);
        }

        Ok(GlyphKeyedDiff {
            quality,
            glyph_count,
            tables,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_raw_tables(
        tables: Vec<(Tag, Vec<u8>, Vec<u32>)>,
        glyph_count: u32,
        quality: u8,
    ) -> GlyphKeyedDiff {
        GlyphKeyedDiff {
            quality,
            glyph_count,
            tables: tables
                .into_iter()
                .map(|(tag, data, offsets)| GlyphDataTable { tag, data, offsets })
                .collect(),
        }
    }

    pub fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    /// Number of glyph data tables carried by patches of this font.
    pub fn table_count(&self) -> u32 {
        self.tables.len() as u32
    }

    /// Sum of the raw (uncompressed) glyph data bytes for `gids`.
    pub fn total_glyph_data(&self, gids: &GlyphSet) -> u64 {
        let mut total = 0u64;
        for table in &self.tables {
            for gid in gids.iter() {
                if gid < self.glyph_count {
                    total += table.glyph_data(gid).len() as u64;
                }
            }
        }
        total
    }

    /// Builds the patch bytes for `gids` at this differ's quality.
    pub fn create_patch(&self, gids: &GlyphSet) -> Result<Vec<u8>, SegmenterError> {
        self.create_patch_at(gids, self.quality)
    }

    /// Builds the patch bytes for `gids` at the given brotli quality.
    pub fn create_patch_at(
        &self,
        gids: &GlyphSet,
        quality: u8,
    ) -> Result<Vec<u8>, SegmenterError> {
        let stream = self.create_data_stream(gids);
        let compressed = compress(&stream, quality)?;

        // Patch header: format tag, reserved, compatibility id, and the
        // maximum uncompressed length of the stream.
        let mut patch = Vec::with_capacity(28 + compressed.len());
        patch.extend_from_slice(&GLYPH_KEYED_FORMAT.to_be_bytes());
        patch.extend_from_slice(&0u32.to_be_bytes());
        patch.extend_from_slice(&[0u8; 16]);
        patch.extend_from_slice(&(stream.len() as u32).to_be_bytes());
        patch.extend_from_slice(&compressed);
        Ok(patch)
    }

    fn create_data_stream(&self, gids: &GlyphSet) -> Vec<u8> {
        let gids: Vec<u32> = gids.iter().filter(|gid| *gid < self.glyph_count).collect();
        let gid_width: usize = if gids.last().copied().unwrap_or(0) > 0xFFFF {
            3
        } else {
            2
        };

        let glyph_count = gids.len();
        let table_count = self.tables.len();
        let header_len = 4 + 1 + glyph_count * gid_width + 4 * table_count;
        let offsets_len = 4 * (glyph_count * table_count + 1);

        let mut stream = Vec::new();
        stream.extend_from_slice(&(glyph_count as u32).to_be_bytes());
        stream.push(table_count as u8);
        for gid in &gids {
            stream.extend_from_slice(&gid.to_be_bytes()[4 - gid_width..]);
        }
        for table in &self.tables {
            stream.extend_from_slice(&table.tag.to_be_bytes());
        }

        // Per glyph data offsets, then the data itself.
        let mut data: Vec<u8> = Vec::new();
        let mut offsets: Vec<u8> = Vec::with_capacity(offsets_len);
        let data_base = (header_len + offsets_len) as u32;
        for table in &self.tables {
            for gid in &gids {
                offsets.extend_from_slice(&(data_base + data.len() as u32).to_be_bytes());
                data.extend_from_slice(table.glyph_data(*gid));
            }
        }
        offsets.extend_from_slice(&(data_base + data.len() as u32).to_be_bytes());

        stream.extend_from_slice(&offsets);
        stream.extend_from_slice(&data);
        stream
    }
}

const GLYPH_KEYED_FORMAT: u32 = u32::from_be_bytes(*b"ifgk");

fn compress(data: &[u8], quality: u8) -> Result<Vec<u8>, SegmenterError> {
    let quality = Quality::new(quality)
        .map_err(|_| SegmenterError::InvalidArgument(format!("bad brotli quality {quality}")))?;
    let encoder = BrotliEncoderOptions::new()
        .quality(quality)
        .build()
        .map_err(|e| SegmenterError::Internal(format!("brotli encoder setup failed: {e}")))?;

    let mut writer = CompressorWriter::with_encoder(encoder, Vec::new());
    writer
        .write_all(data)
        .map_err(|e| SegmenterError::Internal(format!("brotli compression failed: {e}")))?;
    writer
        .into_inner()
        .map_err(|e| SegmenterError::Internal(format!("brotli compression failed: {e}")))
}

fn glyf_data_table(
    font: &FontRef,
    glyph_count: u32,
) -> Result<Option<GlyphDataTable>, SegmenterError> {
    let (Some(glyf), Some(loca)) = (font.table_data(GLYF), font.table_data(Tag::new(b"loca")))
    else {
        return Ok(None);
    };

    let long_offsets = font.head()?.index_to_loc_format() == 1;
    let loca = loca.as_bytes();
    let mut offsets = Vec::with_capacity(glyph_count as usize + 1);
    for index in 0..=glyph_count as usize {
        let offset = if long_offsets {
            read_u32(loca, index * 4)
        } else {
            read_u16(loca, index * 2).map(|v| v as u32 * 2)
        };
        offsets.push(offset.ok_or_else(|| {
            SegmenterError::Closure("loca table is too short for the glyph count".to_string())
        })?);
    }

    Ok(Some(GlyphDataTable {
        tag: GLYF,
        data: glyf.as_bytes().to_vec(),
        offsets,
    }))
}

fn gvar_data_table(
    font: &FontRef,
    glyph_count: u32,
) -> Result<Option<GlyphDataTable>, SegmenterError> {
    let Some(gvar) = font.table_data(GVAR) else {
        return Ok(None);
    };
    let gvar = gvar.as_bytes();

    let too_short =
        || SegmenterError::Closure("gvar table is too short for the glyph count".to_string());

    let gvar_glyph_count = read_u16(gvar, 12).ok_or_else(too_short)? as u32;
    let long_offsets = read_u16(gvar, 14).ok_or_else(too_short)? & 1 != 0;
    let data_offset = read_u32(gvar, 16).ok_or_else(too_short)? as usize;

    let count = glyph_count.min(gvar_glyph_count);
    let mut offsets = Vec::with_capacity(glyph_count as usize + 1);
    for index in 0..=count as usize {
        let offset = if long_offsets {
            read_u32(gvar, 20 + index * 4)
        } else {
            read_u16(gvar, 20 + index * 2).map(|v| v as u32 * 2)
        };
        offsets.push(offset.ok_or_else(too_short)?);
    }
    // Glyphs past the gvar glyph count have no variation data.
    while offsets.len() < glyph_count as usize + 1 {
        offsets.push(*offsets.last().unwrap());
    }

    Ok(Some(GlyphDataTable {
        tag: GVAR,
        data: gvar.get(data_offset..).unwrap_or_default().to_vec(),
        offsets,
    }))
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_differ() -> GlyphKeyedDiff {
        // 4 glyphs with 10, 0, 30, and 5 bytes of outline data.
        let data: Vec<u8> = (0u8..45).collect();
        GlyphKeyedDiff::from_raw_tables(
            vec![(GLYF, data, vec![0, 10, 10, 40, 45])],
            4,
            9,
        )
    }

    #[test]
    fn total_glyph_data_sums_ranges() {
        let differ = test_differ();
        assert_eq!(differ.total_glyph_data(&GlyphSet::from([0])), 10);
        assert_eq!(differ.total_glyph_data(&GlyphSet::from([1])), 0);
        assert_eq!(differ.total_glyph_data(&GlyphSet::from([0, 2, 3])), 45);
        // Out of range gids are ignored.
        assert_eq!(differ.total_glyph_data(&GlyphSet::from([9])), 0);
    }

    #[test]
    fn create_patch_is_deterministic() {
        let differ = test_differ();
        let gids = GlyphSet::from([0, 2]);
        let a = differ.create_patch(&gids).unwrap();
        let b = differ.create_patch(&gids).unwrap();
        assert_eq!(a, b);
        assert!(a.len() > 28);
        assert_eq!(&a[0..4], b"ifgk");
    }

    #[test]
    fn patch_grows_with_more_glyphs() {
        let differ = test_differ();
        let small = differ.create_patch(&GlyphSet::from([1])).unwrap();
        let large = differ.create_patch(&GlyphSet::from([0, 2, 3])).unwrap();
        assert!(large.len() > small.len());
    }

    #[test]
    fn quality_affects_size_not_contents() {
        // Compressible payload so quality differences can show up, and both
        // calls still measure the same logical stream.
        let data = vec![7u8; 4096];
        let differ = GlyphKeyedDiff::from_raw_tables(
            vec![(GLYF, data, vec![0, 2048, 4096])],
            2,
            1,
        );
        let gids = GlyphSet::from([0, 1]);
        let fast = differ.create_patch_at(&gids, 1).unwrap();
        let best = differ.create_patch_at(&gids, 11).unwrap();
        assert!(!fast.is_empty() && !best.is_empty());
        assert!(best.len() <= fast.len());
    }
}
