//! Scripted closure and patch size backends used by tests.
//!
//! The scripted font maps lowercase ascii letters to glyph ids (a -> 1,
//! b -> 2, ...) and lets tests declare substitution style rules that mimic how
//! real closures behave: ligatures require all of their codepoints, alternates
//! any one of them, and feature rules additionally require a feature tag.

use fnv::FnvHashMap;

use font_types::Tag;

use crate::closure::GlyphClosure;
use crate::error::SegmenterError;
use crate::glyph_closure_cache::GlyphClosureCache;
use crate::int_set::GlyphSet;
use crate::patch_size_cache::PatchSizeCache;
use crate::subset_definition::SubsetDefinition;

pub(crate) struct ScriptedFont {
    glyph_count: u32,
    // All codepoints present -> glyph.
    ligatures: Vec<(Vec<u32>, u32)>,
    // Any codepoint present -> glyph.
    alternates: Vec<(Vec<u32>, u32)>,
    // Feature tag plus all codepoints present -> glyph.
    feature_rules: Vec<(Tag, Vec<u32>, u32)>,
}

impl ScriptedFont {
    pub(crate) fn new(glyph_count: u32) -> ScriptedFont {
        ScriptedFont {
            glyph_count,
            ligatures: Vec::new(),
            alternates: Vec::new(),
            feature_rules: Vec::new(),
        }
    }

    pub(crate) fn with_ligature(mut self, codepoints: &[u32], gid: u32) -> ScriptedFont {
        self.ligatures.push((codepoints.to_vec(), gid));
        self
    }

    pub(crate) fn with_alternate(mut self, codepoints: &[u32], gid: u32) -> ScriptedFont {
        self.alternates.push((codepoints.to_vec(), gid));
        self
    }

    pub(crate) fn with_feature_glyph(
        mut self,
        feature: Tag,
        codepoints: &[u32],
        gid: u32,
    ) -> ScriptedFont {
        self.feature_rules.push((feature, codepoints.to_vec(), gid));
        self
    }
}

impl GlyphClosure for ScriptedFont {
    fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    fn glyph_closure(&self, definition: &SubsetDefinition) -> Result<GlyphSet, SegmenterError> {
        let mut gids = GlyphSet::from([0]);

        for cp in definition.codepoints.iter() {
            if ('a' as u32..='z' as u32).contains(&cp) {
                gids.insert(cp - 'a' as u32 + 1);
            }
        }

        for (codepoints, gid) in &self.ligatures {
            if codepoints
                .iter()
                .all(|cp| definition.codepoints.contains(*cp))
            {
                gids.insert(*gid);
            }
        }
        for (codepoints, gid) in &self.alternates {
            if codepoints
                .iter()
                .any(|cp| definition.codepoints.contains(*cp))
            {
                gids.insert(*gid);
            }
        }
        for (feature, codepoints, gid) in &self.feature_rules {
            if definition.feature_tags.contains(feature)
                && codepoints
                    .iter()
                    .all(|cp| definition.codepoints.contains(*cp))
            {
                gids.insert(*gid);
            }
        }

        Ok(gids.iter().filter(|gid| *gid < self.glyph_count).collect())
    }
}

/// Glyph id of a lowercase ascii letter in the scripted font.
pub(crate) fn scripted_gid(c: char) -> u32 {
    c as u32 - 'a' as u32 + 1
}

/// A closure cache over a rule free scripted font.
pub(crate) fn scripted_closure_cache(glyph_count: u32) -> GlyphClosureCache<'static> {
    GlyphClosureCache::new(Box::new(ScriptedFont::new(glyph_count)))
}

/// Patch sizes computed from fixed per glyph byte weights; the size of a patch
/// is the sum of the weights of its glyphs.
pub(crate) struct FixedPatchSizeCache {
    weights: FnvHashMap<u32, u32>,
    default_weight: u32,
}

impl FixedPatchSizeCache {
    pub(crate) fn new(default_weight: u32) -> FixedPatchSizeCache {
        FixedPatchSizeCache {
            weights: Default::default(),
            default_weight,
        }
    }

    pub(crate) fn with_weight(mut self, gid: u32, weight: u32) -> FixedPatchSizeCache {
        self.weights.insert(gid, weight);
        self
    }
}

impl PatchSizeCache for FixedPatchSizeCache {
    fn patch_size(&mut self, gids: &GlyphSet) -> Result<u32, SegmenterError> {
        Ok(gids
            .iter()
            .map(|gid| *self.weights.get(&gid).unwrap_or(&self.default_weight))
            .sum())
    }
}
