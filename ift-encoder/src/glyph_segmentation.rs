//! The finalized glyph segmentation plan.

use std::collections::{BTreeMap, BTreeSet};

use fnv::FnvHashMap;

use crate::activation_condition::ActivationCondition;
use crate::error::SegmenterError;
use crate::int_set::GlyphSet;
use crate::patch_map::PatchMapEntry;
use crate::subset_definition::SubsetDefinition;

/// Describes how the glyphs in a font should be segmented into glyph keyed
/// patches.
///
/// A segmentation describes the groups of glyphs belonging to each patch as
/// well as the conditions under which those patches should be loaded. A
/// properly formed segmentation satisfies the glyph closure requirement:
///
/// The set of glyphs contained in patches loaded for a font subset definition
/// through the patch map tables must be a superset of those in the glyph
/// closure of the font subset definition.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphSegmentation {
    init_font_segment: SubsetDefinition,
    init_font_glyphs: GlyphSet,
    segments: Vec<SubsetDefinition>,
    patches: BTreeMap<u32, GlyphSet>,
    conditions: BTreeSet<ActivationCondition>,
    unmapped_glyphs: GlyphSet,
}

impl GlyphSegmentation {
    pub(crate) fn new(
        init_font_segment: SubsetDefinition,
        init_font_glyphs: GlyphSet,
        unmapped_glyphs: GlyphSet,
        segments: Vec<SubsetDefinition>,
    ) -> GlyphSegmentation {
        GlyphSegmentation {
            init_font_segment,
            init_font_glyphs,
            segments,
            patches: Default::default(),
            conditions: Default::default(),
            unmapped_glyphs,
        }
    }

    pub(crate) fn add_patch(
        &mut self,
        patch_id: u32,
        condition: ActivationCondition,
        glyphs: GlyphSet,
    ) {
        self.patches.insert(patch_id, glyphs);
        self.conditions.insert(condition);
    }

    /// The conditions under which the patches in this segmentation are
    /// activated, in their canonical order.
    pub fn conditions(&self) -> &BTreeSet<ActivationCondition> {
        &self.conditions
    }

    /// The subset definitions that segment indices in the conditions refer
    /// to. Index stable: merged away segments are present but empty.
    pub fn segments(&self) -> &[SubsetDefinition] {
        &self.segments
    }

    /// The glyphs belonging to each patch, keyed by the patch id used in the
    /// activation conditions.
    pub fn patches(&self) -> &BTreeMap<u32, GlyphSet> {
        &self.patches
    }

    /// Glyphs whose activation condition could not be determined. These are
    /// carried by the fallback patch.
    pub fn unmapped_glyphs(&self) -> &GlyphSet {
        &self.unmapped_glyphs
    }

    /// The glyph closure of the initial font subset. Patches never contain
    /// these glyphs.
    pub fn init_font_glyphs(&self) -> &GlyphSet {
        &self.init_font_glyphs
    }

    /// The codepoints/features of the initial font, without the default
    /// always included items.
    pub fn init_font_segment(&self) -> &SubsetDefinition {
        &self.init_font_segment
    }

    /// Lowers the activation conditions of this plan into the flat patch map
    /// entry table consumed by the patch map encoder.
    pub fn to_patch_map_entries(&self) -> Result<Vec<PatchMapEntry>, SegmenterError> {
        let mut segments: FnvHashMap<u32, SubsetDefinition> = Default::default();
        for (index, definition) in self.segments.iter().enumerate() {
            if !definition.is_empty() {
                segments.insert(index as u32, definition.clone());
            }
        }

        let conditions: Vec<ActivationCondition> = self.conditions.iter().cloned().collect();
        ActivationCondition::activation_conditions_to_patch_map_entries(&conditions, &segments)
    }
}

impl std::fmt::Display for GlyphSegmentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "initial font: ")?;
        write_glyph_set(f, &self.init_font_glyphs)?;
        writeln!(f)?;

        for (patch_id, gids) in &self.patches {
            write!(f, "p{patch_id}: ")?;
            write_glyph_set(f, gids)?;
            writeln!(f)?;
        }

        for condition in &self.conditions {
            writeln!(f, "{condition}")?;
        }
        Ok(())
    }
}

fn write_glyph_set(f: &mut std::fmt::Formatter<'_>, gids: &GlyphSet) -> std::fmt::Result {
    if gids.is_empty() {
        return write!(f, "{{}}");
    }
    write!(f, "{{ ")?;
    for (i, gid) in gids.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "gid{gid}")?;
    }
    write!(f, " }}")
}
