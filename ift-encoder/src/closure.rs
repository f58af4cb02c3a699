//! The glyph closure interface the planner analyzes fonts through.

use read_fonts::collections::IntSet as SparseSet;
use read_fonts::tables::glyf::Glyph;
use read_fonts::types::GlyphId;
use read_fonts::{FontRef, TableProvider};

use crate::error::SegmenterError;
use crate::int_set::GlyphSet;
use crate::subset_definition::SubsetDefinition;

/// Computes glyph closures over a font.
///
/// A glyph closure is the set of glyph ids needed to correctly render any text
/// covered by a subset definition: the directly mapped glyphs plus everything
/// reachable through substitutions and glyph composition.
pub trait GlyphClosure {
    /// Number of glyphs in the font.
    fn glyph_count(&self) -> u32;

    /// Returns the closure over all glyphs reachable from `definition`.
    fn glyph_closure(&self, definition: &SubsetDefinition) -> Result<GlyphSet, SegmenterError>;
}

/// Glyph closure computed directly from a font's cmap, GSUB, and glyf tables.
///
/// GSUB closure is computed over all reachable lookups, so feature tags in the
/// input definition select no additional glyphs beyond what the codepoints
/// already reach; the result is a conservative superset for feature-restricted
/// subsets. Design space ranges do not affect closure.
pub struct FontClosure<'a> {
    font: FontRef<'a>,
    glyph_count: u32,
}

impl<'a> FontClosure<'a> {
    pub fn new(font: FontRef<'a>) -> Result<FontClosure<'a>, SegmenterError> {
        let glyph_count = font.maxp()?.num_glyphs() as u32;
        Ok(FontClosure { font, glyph_count })
    }

    fn add_mapped_glyphs(
        &self,
        definition: &SubsetDefinition,
        gids: &mut SparseSet<GlyphId>,
    ) -> Result<(), SegmenterError> {
        let cmap = self.font.cmap()?;
        for cp in definition.codepoints.iter() {
            if let Some(gid) = cmap.map_codepoint(cp) {
                gids.insert(gid);
            }
        }

        // Unicode variation sequence mappings.
        let unicodes: SparseSet<u32> = definition.codepoints.iter().collect();
        cmap.closure_glyphs(&unicodes, gids);
        Ok(())
    }

    fn add_substitution_closure(
        &self,
        gids: &mut SparseSet<GlyphId>,
    ) -> Result<(), SegmenterError> {
        let Ok(gsub) = self.font.gsub() else {
            return Ok(());
        };

        let mut all_lookups = SparseSet::<u16>::empty();
        all_lookups.invert();
        gsub.closure_glyphs(&all_lookups, gids)?;
        Ok(())
    }

    fn add_component_glyphs(&self, gids: &mut SparseSet<GlyphId>) {
        let (Ok(loca), Ok(glyf)) = (self.font.loca(None), self.font.glyf()) else {
            return;
        };

        let mut pending: Vec<GlyphId> = gids.iter().collect();
        while let Some(gid) = pending.pop() {
            let Ok(Some(Glyph::Composite(composite))) = loca.get_glyf(gid, &glyf) else {
                continue;
            };
            for (component, _) in composite.component_glyphs_and_flags() {
                let component = GlyphId::from(component);
                if gids.insert(component) {
                    pending.push(component);
                }
            }
        }
    }
}

impl GlyphClosure for FontClosure<'_> {
    fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    fn glyph_closure(&self, definition: &SubsetDefinition) -> Result<GlyphSet, SegmenterError> {
        let mut gids = SparseSet::<GlyphId>::empty();
        gids.insert(GlyphId::NOTDEF);

        self.add_mapped_glyphs(definition, &mut gids)?;
        self.add_substitution_closure(&mut gids)?;
        self.add_component_glyphs(&mut gids);

        Ok(gids
            .iter()
            .map(|gid| gid.to_u32())
            .filter(|gid| *gid < self.glyph_count)
            .collect())
    }
}
