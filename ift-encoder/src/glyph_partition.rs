//! Disjoint sets of glyph ids.

use fnv::FnvHashMap;

use crate::error::SegmenterError;
use crate::int_set::GlyphSet;

/// Stores disjoint sets of glyph ids over `[0, num_glyphs)` and can retrieve
/// all members of each set.
#[derive(Clone, Debug)]
pub struct GlyphPartition {
    rank: Vec<u32>,
    parent: Vec<u32>,

    cache_valid: bool,
    rep_to_set: FnvHashMap<u32, GlyphSet>,
    non_identity_groups: Vec<GlyphSet>,
}

impl GlyphPartition {
    pub fn new(num_glyphs: u32) -> GlyphPartition {
        GlyphPartition {
            rank: vec![0; num_glyphs as usize],
            parent: (0..num_glyphs).collect(),
            cache_valid: false,
            rep_to_set: Default::default(),
            non_identity_groups: Vec::new(),
        }
    }

    pub fn num_glyphs(&self) -> u32 {
        self.parent.len() as u32
    }

    fn check_bounds(&self, glyph: u32) -> Result<(), SegmenterError> {
        if glyph as usize >= self.parent.len() {
            return Err(SegmenterError::InvalidArgument(format!(
                "glyph id {glyph} is out of bounds"
            )));
        }
        Ok(())
    }

    /// Merge all of the sets that intersect `glyphs` into a single set.
    pub fn union_set(&mut self, glyphs: &GlyphSet) -> Result<(), SegmenterError> {
        let Some(first) = glyphs.first() else {
            return Ok(());
        };
        for gid in glyphs.iter().skip(1) {
            self.union(first, gid)?;
        }
        Ok(())
    }

    /// Merge the sets containing `glyph1` and `glyph2` together.
    pub fn union(&mut self, glyph1: u32, glyph2: u32) -> Result<(), SegmenterError> {
        let root1 = self.find(glyph1)?;
        let root2 = self.find(glyph2)?;

        if root1 != root2 {
            let (r1, r2) = (root1 as usize, root2 as usize);
            if self.rank[r1] < self.rank[r2] {
                self.parent[r1] = root2;
            } else if self.rank[r1] > self.rank[r2] {
                self.parent[r2] = root1;
            } else {
                self.parent[r2] = root1;
                self.rank[r1] += 1;
            }
        }
        self.cache_valid = false;
        Ok(())
    }

    /// Union each set from `other` into this partition. Both partitions must
    /// have the same capacity.
    pub fn union_partition(&mut self, other: &GlyphPartition) -> Result<(), SegmenterError> {
        if other.parent.len() != self.parent.len() {
            return Err(SegmenterError::InvalidArgument(
                "glyph partitions are not compatible, they must have the same number of elements"
                    .to_string(),
            ));
        }

        for set in other.groups() {
            if set.len() > 1 {
                self.union_set(&set)?;
            }
        }
        Ok(())
    }

    /// Returns a representative member of the group that `glyph` belongs to.
    pub fn find(&mut self, glyph: u32) -> Result<u32, SegmenterError> {
        self.check_bounds(glyph)?;

        let mut root = glyph;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }

        // Path compression.
        let mut current = glyph;
        while current != root {
            let next = self.parent[current as usize];
            self.parent[current as usize] = root;
            current = next;
        }

        Ok(root)
    }

    fn find_readonly(&self, glyph: u32) -> u32 {
        let mut root = glyph;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        root
    }

    /// Returns all members of the group the glyph belongs to.
    pub fn glyphs_for(&mut self, glyph: u32) -> Result<&GlyphSet, SegmenterError> {
        self.check_bounds(glyph)?;
        self.rebuild_cache_if_needed()?;
        let rep = self.find(glyph)?;
        self.rep_to_set
            .get(&rep)
            .ok_or_else(|| SegmenterError::Internal(format!("no group cached for glyph {glyph}")))
    }

    /// Returns all groups in this partition that have more than one member, in
    /// ascending order.
    pub fn non_identity_groups(&mut self) -> Result<&[GlyphSet], SegmenterError> {
        self.rebuild_cache_if_needed()?;
        Ok(&self.non_identity_groups)
    }

    fn groups(&self) -> Vec<GlyphSet> {
        let mut rep_to_set: FnvHashMap<u32, GlyphSet> = Default::default();
        for gid in 0..self.parent.len() as u32 {
            rep_to_set
                .entry(self.find_readonly(gid))
                .or_default()
                .insert(gid);
        }
        rep_to_set.into_values().collect()
    }

    fn rebuild_cache_if_needed(&mut self) -> Result<(), SegmenterError> {
        if self.cache_valid {
            return Ok(());
        }

        self.rep_to_set.clear();
        for gid in 0..self.parent.len() as u32 {
            let rep = self.find(gid)?;
            self.rep_to_set.entry(rep).or_default().insert(gid);
        }

        self.non_identity_groups = self
            .rep_to_set
            .values()
            .filter(|gids| gids.len() > 1)
            .cloned()
            .collect();
        // Sort so the ordering is deterministic.
        self.non_identity_groups.sort();

        self.cache_valid = true;
        Ok(())
    }
}

impl PartialEq for GlyphPartition {
    fn eq(&self, other: &Self) -> bool {
        if self.parent.len() != other.parent.len() {
            return false;
        }
        let mut groups: Vec<GlyphSet> = self.groups().into_iter().filter(|g| g.len() > 1).collect();
        let mut other_groups: Vec<GlyphSet> =
            other.groups().into_iter().filter(|g| g.len() > 1).collect();
        groups.sort();
        other_groups.sort();
        groups == other_groups
    }
}

impl Eq for GlyphPartition {}
