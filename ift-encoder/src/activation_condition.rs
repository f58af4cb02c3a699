//! Activation conditions: boolean formulas over segments which decide when a
//! patch should be loaded.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use fnv::FnvHashMap;

use crate::error::SegmenterError;
use crate::int_set::{IntSet, SegmentSet};
use crate::patch_map::{Coverage, PatchEncoding, PatchMapEntry};
use crate::segment::Segment;
use crate::subset_definition::SubsetDefinition;

/// The conditions under which a patch should be loaded.
///
/// Stored as a conjunction of disjunctions over segment indices:
/// `(s_1_1 OR s_1_2 OR ...) AND (s_2_1 OR ...) AND ...`. The condition is
/// satisfied when the input subset definition intersects at least one segment
/// of every group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationCondition {
    conditions: Vec<SegmentSet>,
    activated: u32,
    is_fallback: bool,
    is_exclusive: bool,
}

impl ActivationCondition {
    /// A condition activated by exactly one segment which no other condition
    /// requires.
    pub fn exclusive_segment(segment: u32, activated: u32) -> ActivationCondition {
        ActivationCondition {
            conditions: vec![SegmentSet::from([segment])],
            activated,
            is_fallback: false,
            is_exclusive: true,
        }
    }

    /// A condition that activates when all of `segments` intersect the input.
    pub fn and_segments(segments: &SegmentSet, activated: u32) -> ActivationCondition {
        ActivationCondition {
            conditions: segments
                .iter()
                .map(|s| SegmentSet::from([s]))
                .collect(),
            activated,
            is_fallback: false,
            is_exclusive: false,
        }
    }

    /// A condition that activates when any of `segments` intersects the input.
    pub fn or_segments(segments: &SegmentSet, activated: u32) -> ActivationCondition {
        ActivationCondition {
            conditions: vec![segments.clone()],
            activated,
            is_fallback: false,
            is_exclusive: false,
        }
    }

    /// The catch all condition: a disjunction over every non empty segment.
    pub fn fallback(segments: &SegmentSet, activated: u32) -> ActivationCondition {
        ActivationCondition {
            conditions: vec![segments.clone()],
            activated,
            is_fallback: true,
            is_exclusive: false,
        }
    }

    /// A general conjunction of disjunctive groups.
    pub fn composite_condition(groups: &[SegmentSet], activated: u32) -> ActivationCondition {
        ActivationCondition {
            conditions: groups.to_vec(),
            activated,
            is_fallback: false,
            is_exclusive: false,
        }
    }

    /// The conjunctive groups of this condition.
    pub fn conditions(&self) -> &[SegmentSet] {
        &self.conditions
    }

    /// The patch to load when the condition is satisfied.
    pub fn activated(&self) -> u32 {
        self.activated
    }

    /// Returns a copy of this condition activating `patch_id` instead.
    pub fn with_activated(&self, patch_id: u32) -> ActivationCondition {
        let mut copy = self.clone();
        copy.activated = patch_id;
        copy
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    /// True when the condition is a single group with a single segment.
    pub fn is_unitary(&self) -> bool {
        self.conditions.len() == 1 && self.conditions[0].len() == 1
    }

    /// The set of all segments that appear anywhere in this condition.
    pub fn triggering_segments(&self) -> SegmentSet {
        let mut out = SegmentSet::empty();
        for group in &self.conditions {
            out.union(group);
        }
        out
    }

    fn is_conjunctive(&self) -> bool {
        self.conditions.iter().all(|group| group.len() == 1)
    }

    fn is_disjunctive(&self) -> bool {
        self.conditions.len() == 1
    }

    fn segment_probability(segments: &[Segment], index: u32) -> Result<f64, SegmenterError> {
        segments
            .get(index as usize)
            .map(|s| s.probability())
            .ok_or_else(|| {
                SegmenterError::InvalidArgument(format!("segment index {index} is out of bounds"))
            })
    }

    /// Probability that this condition is satisfied, assuming segment
    /// independence.
    ///
    /// Composite conditions (multiple groups, at least one non singleton) are
    /// not supported and return `Unimplemented`.
    pub fn probability(&self, segments: &[Segment]) -> Result<f64, SegmenterError> {
        if self.is_conjunctive() {
            let mut p = 1.0;
            for group in &self.conditions {
                for s in group.iter() {
                    p *= Self::segment_probability(segments, s)?;
                }
            }
            return Ok(p);
        }

        if self.is_disjunctive() {
            let mut not_matched = 1.0;
            for s in self.conditions[0].iter() {
                not_matched *= 1.0 - Self::segment_probability(segments, s)?;
            }
            return Ok(1.0 - not_matched);
        }

        Err(SegmenterError::Unimplemented(
            "probability of composite conditions is not supported",
        ))
    }

    /// Probability of this condition after the segments in `merged_segments`
    /// have been merged into a single segment with probability
    /// `merged_probability`.
    ///
    /// Any of this condition's terms found in `merged_segments` are replaced
    /// by a single term for the merged segment; terms outside of it keep their
    /// own probability.
    pub fn merged_probability(
        &self,
        segments: &[Segment],
        merged_segments: &SegmentSet,
        merged_probability: f64,
    ) -> Result<f64, SegmenterError> {
        if self.is_conjunctive() {
            let mut p = 1.0;
            let mut merged_term = false;
            for group in &self.conditions {
                for s in group.iter() {
                    if merged_segments.contains(s) {
                        merged_term = true;
                    } else {
                        p *= Self::segment_probability(segments, s)?;
                    }
                }
            }
            if merged_term {
                p *= merged_probability;
            }
            return Ok(p);
        }

        if self.is_disjunctive() {
            let mut not_matched = 1.0;
            let mut merged_term = false;
            for s in self.conditions[0].iter() {
                if merged_segments.contains(s) {
                    merged_term = true;
                } else {
                    not_matched *= 1.0 - Self::segment_probability(segments, s)?;
                }
            }
            if merged_term {
                not_matched *= 1.0 - merged_probability;
            }
            return Ok(1.0 - not_matched);
        }

        Err(SegmenterError::Unimplemented(
            "merged probability of composite conditions is not supported",
        ))
    }

    /// Converts a list of activation conditions into the flat patch map entry
    /// table used by the encoder.
    ///
    /// To minimize encoded size set definitions are shared between conditions
    /// via child entry references, built up over three phases:
    /// base entries for every referenced segment, disjunctive entries for
    /// multi segment groups, and finally conjunctive entries for the remaining
    /// composite conditions.
    pub fn activation_conditions_to_patch_map_entries(
        conditions: &[ActivationCondition],
        segments: &FnvHashMap<u32, SubsetDefinition>,
    ) -> Result<Vec<PatchMapEntry>, SegmenterError> {
        let mut entries: Vec<PatchMapEntry> = Vec::new();
        if conditions.is_empty() {
            return Ok(entries);
        }

        let mut remaining: BTreeSet<ActivationCondition> = conditions.iter().cloned().collect();

        let mut last_patch_id: u32 = 0;
        let mut next_entry_index: u32 = 0;

        // Phase 1: one base entry per distinct segment referenced by at least
        // one condition. Later entries refer back to these via child indices.
        // A base entry can additionally map one unitary condition directly.
        let mut segment_to_entry_index: FnvHashMap<u32, u32> = Default::default();
        let mut handled: Vec<ActivationCondition> = Vec::new();
        for condition in &remaining {
            let mut mapped = false;
            for group in condition.conditions() {
                for segment_id in group.iter() {
                    if segment_to_entry_index.contains_key(&segment_id) {
                        continue;
                    }

                    let definition = segments.get(&segment_id).ok_or_else(|| {
                        SegmenterError::InvalidArgument(format!(
                            "codepoint segment {segment_id} not found"
                        ))
                    })?;

                    // Segments match on {codepoints} OR {features}, whereas
                    // IFT entries match on {codepoints} AND {features}. When
                    // both are present they become two ignored child entries
                    // joined by a disjunctive parent.
                    let codepoints_entry = (!definition.codepoints.is_empty()).then(|| {
                        PatchMapEntry {
                            coverage: Coverage::from_codepoints(definition.codepoints.clone()),
                            encoding: PatchEncoding::GlyphKeyed,
                            ..Default::default()
                        }
                    });
                    let features_entry = (!definition.feature_tags.is_empty()).then(|| {
                        PatchMapEntry {
                            coverage: Coverage::from_features(
                                definition.feature_tags.iter().copied(),
                            ),
                            encoding: PatchEncoding::GlyphKeyed,
                            ..Default::default()
                        }
                    });

                    let mut entry = match (codepoints_entry, features_entry) {
                        (Some(mut codepoints_entry), Some(mut features_entry)) => {
                            make_ignored(&mut codepoints_entry, &mut last_patch_id);
                            entries.push(codepoints_entry);
                            let codepoints_index = next_entry_index;
                            next_entry_index += 1;

                            make_ignored(&mut features_entry, &mut last_patch_id);
                            entries.push(features_entry);
                            let features_index = next_entry_index;
                            next_entry_index += 1;

                            PatchMapEntry {
                                coverage: Coverage {
                                    child_indices: IntSet::from([
                                        codepoints_index,
                                        features_index,
                                    ]),
                                    conjunctive: false,
                                    ..Default::default()
                                },
                                encoding: PatchEncoding::GlyphKeyed,
                                ..Default::default()
                            }
                        }
                        (Some(entry), None) => entry,
                        (None, Some(entry)) => entry,
                        (None, None) => {
                            return Err(SegmenterError::InvalidArgument(format!(
                                "segment {segment_id} has an empty definition"
                            )))
                        }
                    };

                    if condition.is_unitary() {
                        map_to(&mut entry, condition.activated(), &mut last_patch_id);
                        mapped = true;
                    } else {
                        make_ignored(&mut entry, &mut last_patch_id);
                    }

                    entries.push(entry);
                    segment_to_entry_index.insert(segment_id, next_entry_index);
                    next_entry_index += 1;
                }
            }

            if mapped {
                handled.push(condition.clone());
            }
        }
        for condition in handled.drain(..) {
            remaining.remove(&condition);
        }

        // Phase 2: one disjunctive entry per multi segment group, referencing
        // the phase 1 entries. A condition made of a single group maps itself
        // onto that group's entry.
        let mut group_to_entry_index: FnvHashMap<SegmentSet, u32> = Default::default();
        for condition in &remaining {
            let mut mapped = false;
            for group in condition.conditions() {
                if group.len() <= 1 || group_to_entry_index.contains_key(group) {
                    // Groups of one reference the base entry directly.
                    continue;
                }

                let mut entry = PatchMapEntry {
                    encoding: PatchEncoding::GlyphKeyed,
                    ..Default::default()
                };
                for segment_id in group.iter() {
                    let index = segment_to_entry_index.get(&segment_id).ok_or_else(|| {
                        SegmenterError::Internal(format!(
                            "entry for segment {segment_id} was not previously created"
                        ))
                    })?;
                    entry.coverage.child_indices.insert(*index);
                }

                if condition.conditions().len() == 1 {
                    map_to(&mut entry, condition.activated(), &mut last_patch_id);
                    mapped = true;
                } else {
                    make_ignored(&mut entry, &mut last_patch_id);
                }

                entries.push(entry);
                group_to_entry_index.insert(group.clone(), next_entry_index);
                next_entry_index += 1;
            }

            if mapped {
                handled.push(condition.clone());
            }
        }
        for condition in handled.drain(..) {
            remaining.remove(&condition);
        }

        // Phase 3: conjunctive entries for everything left, referencing phase
        // 1 and phase 2 entries.
        for condition in &remaining {
            let mut entry = PatchMapEntry {
                encoding: PatchEncoding::GlyphKeyed,
                ..Default::default()
            };
            entry.coverage.conjunctive = true;

            for group in condition.conditions() {
                let index = if group.len() == 1 {
                    segment_to_entry_index.get(&group.first().unwrap())
                } else {
                    group_to_entry_index.get(group)
                };
                let index = index.ok_or_else(|| {
                    SegmenterError::Internal(
                        "entry for condition group was not previously created".to_string(),
                    )
                })?;
                entry.coverage.child_indices.insert(*index);
            }

            map_to(&mut entry, condition.activated(), &mut last_patch_id);
            entries.push(entry);
        }

        Ok(entries)
    }
}

fn make_ignored(entry: &mut PatchMapEntry, last_patch_id: &mut u32) {
    entry.ignored = true;
    // The patch id of an ignored entry doesn't matter; last + 1 minimizes the
    // encoded varint width.
    *last_patch_id += 1;
    entry.patch_indices = vec![*last_patch_id];
}

fn map_to(entry: &mut PatchMapEntry, patch_id: u32, last_patch_id: &mut u32) {
    entry.ignored = false;
    entry.patch_indices = vec![patch_id];
    *last_patch_id = patch_id;
}

impl Ord for ActivationCondition {
    fn cmp(&self, other: &Self) -> Ordering {
        let ordering = self.conditions.len().cmp(&other.conditions.len());
        if ordering != Ordering::Equal {
            return ordering;
        }

        for (a, b) in self.conditions.iter().zip(other.conditions.iter()) {
            let ordering = a.len().cmp(&b.len());
            if ordering != Ordering::Equal {
                return ordering;
            }
            for (a_segment, b_segment) in a.iter().zip(b.iter()) {
                let ordering = a_segment.cmp(&b_segment);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }

        let ordering = self.activated.cmp(&other.activated);
        if ordering != Ordering::Equal {
            return ordering;
        }

        // Exclusive conditions sort before non exclusive, fallbacks sort last.
        let ordering = other.is_exclusive.cmp(&self.is_exclusive);
        if ordering != Ordering::Equal {
            return ordering;
        }
        self.is_fallback.cmp(&other.is_fallback)
    }
}

impl PartialOrd for ActivationCondition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ActivationCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "if (")?;
        for (i, group) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            if group.len() > 1 {
                write!(f, "(")?;
            }
            for (j, segment) in group.iter().enumerate() {
                if j > 0 {
                    write!(f, " OR ")?;
                }
                write!(f, "s{segment}")?;
            }
            if group.len() > 1 {
                write!(f, ")")?;
            }
        }
        write!(f, ") then p{}", self.activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::int_set::CodepointSet;
    use font_types::Tag;
    use pretty_assertions::assert_eq;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn total_order() {
        let exclusive_0 = ActivationCondition::exclusive_segment(0, 0);
        let exclusive_2 = ActivationCondition::exclusive_segment(2, 0);
        let or_01 = ActivationCondition::or_segments(&SegmentSet::from([0, 1]), 0);
        let or_02 = ActivationCondition::or_segments(&SegmentSet::from([0, 2]), 0);
        let and_01 = ActivationCondition::and_segments(&SegmentSet::from([0, 1]), 0);
        let fallback = ActivationCondition::fallback(&SegmentSet::from([0, 1]), 0);

        // Single singleton groups first, then larger groups, then multi group
        // conditions.
        assert!(exclusive_0 < exclusive_2);
        assert!(exclusive_2 < or_01);
        assert!(or_01 < or_02);
        assert!(or_02 < and_01);

        // Exclusive sorts before a non exclusive condition of the same shape,
        // fallback sorts after.
        let single = ActivationCondition::or_segments(&SegmentSet::from([0]), 0);
        assert!(exclusive_0 < single);
        assert!(or_01 < fallback);

        // Patch id breaks ties.
        assert!(
            ActivationCondition::exclusive_segment(0, 1)
                < ActivationCondition::exclusive_segment(0, 2)
        );
    }

    #[test]
    fn display() {
        let composite = ActivationCondition::composite_condition(
            &[SegmentSet::from([1, 3]), SegmentSet::from([2])],
            6,
        );
        assert_eq!(composite.to_string(), "if ((s1 OR s3) AND s2) then p6");
        assert_eq!(
            ActivationCondition::exclusive_segment(4, 2).to_string(),
            "if (s4) then p2"
        );
    }

    #[test]
    fn probabilities() {
        let segments = vec![
            Segment::from_codepoints([], 0.75),
            Segment::from_codepoints([], 0.5),
            Segment::from_codepoints([], 0.25),
        ];

        approx(
            ActivationCondition::exclusive_segment(0, 1)
                .probability(&segments)
                .unwrap(),
            0.75,
        );
        approx(
            ActivationCondition::exclusive_segment(2, 1)
                .probability(&segments)
                .unwrap(),
            0.25,
        );

        approx(
            ActivationCondition::and_segments(&SegmentSet::from([0, 1]), 1)
                .probability(&segments)
                .unwrap(),
            0.75 * 0.5,
        );
        approx(
            ActivationCondition::and_segments(&SegmentSet::from([0, 1, 2]), 1)
                .probability(&segments)
                .unwrap(),
            0.75 * 0.5 * 0.25,
        );

        approx(
            ActivationCondition::or_segments(&SegmentSet::from([1, 2]), 1)
                .probability(&segments)
                .unwrap(),
            0.5 + 0.25 - 0.5 * 0.25,
        );
        approx(
            ActivationCondition::or_segments(&SegmentSet::from([0, 1, 2]), 1)
                .probability(&segments)
                .unwrap(),
            0.75 + 0.5 + 0.25 - 0.75 * 0.5 - 0.75 * 0.25 - 0.5 * 0.25 + 0.75 * 0.5 * 0.25,
        );

        // Composite conditions aren't currently supported.
        assert!(matches!(
            ActivationCondition::composite_condition(
                &[SegmentSet::from([1, 2]), SegmentSet::from([0, 1])],
                1
            )
            .probability(&segments),
            Err(SegmenterError::Unimplemented(_))
        ));

        // Out of bounds segment.
        assert!(matches!(
            ActivationCondition::exclusive_segment(9, 1).probability(&segments),
            Err(SegmenterError::InvalidArgument(_))
        ));
    }

    #[test]
    fn merged_probabilities() {
        let segments = vec![
            Segment::from_codepoints([], 0.75),
            Segment::from_codepoints([], 0.5),
            Segment::from_codepoints([], 0.25),
        ];

        // Segments not present in the condition are ignored.
        approx(
            ActivationCondition::exclusive_segment(0, 1)
                .merged_probability(&segments, &SegmentSet::from([5]), 0.12)
                .unwrap(),
            0.75,
        );

        // One to one replacement.
        approx(
            ActivationCondition::exclusive_segment(0, 1)
                .merged_probability(&segments, &SegmentSet::from([0]), 0.12)
                .unwrap(),
            0.12,
        );

        // Two to one replacement.
        approx(
            ActivationCondition::and_segments(&SegmentSet::from([0, 1]), 1)
                .merged_probability(&segments, &SegmentSet::from([0, 1]), 0.12)
                .unwrap(),
            0.12,
        );
        approx(
            ActivationCondition::or_segments(&SegmentSet::from([0, 1]), 1)
                .merged_probability(&segments, &SegmentSet::from([0, 1]), 0.12)
                .unwrap(),
            0.12,
        );

        // Conjunctive with partial replacement: P(0) * P(merged).
        approx(
            ActivationCondition::and_segments(&SegmentSet::from([0, 1, 2]), 1)
                .merged_probability(&segments, &SegmentSet::from([1, 2]), 0.4)
                .unwrap(),
            0.3,
        );

        // Disjunctive with partial replacement:
        // P(0) + P(merged) - P(0) * P(merged).
        approx(
            ActivationCondition::or_segments(&SegmentSet::from([0, 1, 2]), 1)
                .merged_probability(&segments, &SegmentSet::from([1, 2]), 0.4)
                .unwrap(),
            0.85,
        );

        assert!(matches!(
            ActivationCondition::composite_condition(
                &[SegmentSet::from([0, 1]), SegmentSet::from([2])],
                1
            )
            .merged_probability(&segments, &SegmentSet::from([1, 2]), 0.4),
            Err(SegmenterError::Unimplemented(_))
        ));
    }

    fn codepoints(values: &[u32]) -> SubsetDefinition {
        SubsetDefinition::codepoints(values.iter().copied().collect())
    }

    #[test]
    fn lowering_to_patch_map_entries() {
        let segments: FnvHashMap<u32, SubsetDefinition> = [
            (1, codepoints(&[b'a' as u32, b'b' as u32])),
            (2, codepoints(&[b'c' as u32])),
            (3, codepoints(&[b'd' as u32, b'e' as u32, b'f' as u32])),
            (4, codepoints(&[b'g' as u32])),
        ]
        .into_iter()
        .collect();

        let conditions = vec![
            ActivationCondition::exclusive_segment(2, 2),
            ActivationCondition::exclusive_segment(3, 4),
            ActivationCondition::or_segments(&SegmentSet::from([1, 3]), 5),
            ActivationCondition::composite_condition(
                &[SegmentSet::from([1, 3]), SegmentSet::from([2, 4])],
                6,
            ),
        ];

        let mut expected = vec![
            // entry[0]: segment 2, maps patch 2 directly.
            PatchMapEntry::new(
                Coverage::from_codepoints(CodepointSet::from([b'c' as u32])),
                2,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[1]: segment 3, maps patch 4 directly.
            PatchMapEntry::new(
                Coverage::from_codepoints(CodepointSet::from([
                    b'd' as u32,
                    b'e' as u32,
                    b'f' as u32,
                ])),
                4,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[2]: segment 1, ignored.
            PatchMapEntry::new(
                Coverage::from_codepoints(CodepointSet::from([b'a' as u32, b'b' as u32])),
                5,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[3]: segment 4, ignored.
            PatchMapEntry::new(
                Coverage::from_codepoints(CodepointSet::from([b'g' as u32])),
                6,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[4]: (s1 OR s3), maps patch 5.
            PatchMapEntry::new(
                Coverage {
                    child_indices: IntSet::from([1, 2]),
                    ..Default::default()
                },
                5,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[5]: (s2 OR s4), ignored.
            PatchMapEntry::new(
                Coverage {
                    child_indices: IntSet::from([0, 3]),
                    ..Default::default()
                },
                6,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[6]: ((s1 OR s3) AND (s2 OR s4)), maps patch 6.
            PatchMapEntry::new(
                Coverage {
                    child_indices: IntSet::from([4, 5]),
                    conjunctive: true,
                    ..Default::default()
                },
                6,
                PatchEncoding::GlyphKeyed,
            ),
        ];
        expected[2].ignored = true;
        expected[3].ignored = true;
        expected[5].ignored = true;

        let entries = ActivationCondition::activation_conditions_to_patch_map_entries(
            &conditions,
            &segments,
        )
        .unwrap();
        assert_eq!(entries, expected);
    }

    #[test]
    fn lowering_with_features() {
        let smcp = SubsetDefinition::features([Tag::new(b"smcp")]);
        let mut combined = codepoints(&[b'd' as u32, b'e' as u32, b'f' as u32]);
        combined.feature_tags.insert(Tag::new(b"dlig"));

        let segments: FnvHashMap<u32, SubsetDefinition> =
            [(1, smcp), (2, combined)].into_iter().collect();

        let conditions = vec![ActivationCondition::and_segments(
            &SegmentSet::from([1, 2]),
            5,
        )];

        let mut expected = vec![
            // entry[0]: smcp features of segment 1, ignored.
            PatchMapEntry::new(
                Coverage::from_features([Tag::new(b"smcp")]),
                1,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[1]: codepoints of segment 2, ignored.
            PatchMapEntry::new(
                Coverage::from_codepoints(CodepointSet::from([
                    b'd' as u32,
                    b'e' as u32,
                    b'f' as u32,
                ])),
                2,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[2]: dlig features of segment 2, ignored.
            PatchMapEntry::new(
                Coverage::from_features([Tag::new(b"dlig")]),
                3,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[3]: (entry[1] OR entry[2]) parent for segment 2, ignored.
            PatchMapEntry::new(
                Coverage {
                    child_indices: IntSet::from([1, 2]),
                    ..Default::default()
                },
                4,
                PatchEncoding::GlyphKeyed,
            ),
            // entry[4]: s1 AND s2, maps patch 5.
            PatchMapEntry::new(
                Coverage {
                    child_indices: IntSet::from([0, 3]),
                    conjunctive: true,
                    ..Default::default()
                },
                5,
                PatchEncoding::GlyphKeyed,
            ),
        ];
        expected[0].ignored = true;
        expected[1].ignored = true;
        expected[2].ignored = true;
        expected[3].ignored = true;

        let entries = ActivationCondition::activation_conditions_to_patch_map_entries(
            &conditions,
            &segments,
        )
        .unwrap();
        assert_eq!(entries, expected);
    }

    // Evaluates a lowered entry table against a requested codepoint set,
    // returning the activated (non ignored) patch ids.
    fn evaluate_entries(
        entries: &[crate::patch_map::PatchMapEntry],
        requested: &CodepointSet,
    ) -> Vec<u32> {
        let mut matched: Vec<bool> = Vec::with_capacity(entries.len());
        let mut activated = Vec::new();
        for entry in entries {
            let result = if entry.coverage.child_indices.is_empty() {
                entry.coverage.codepoints.intersects(requested)
            } else if entry.coverage.conjunctive {
                entry
                    .coverage
                    .child_indices
                    .iter()
                    .all(|child| matched[child as usize])
            } else {
                entry
                    .coverage
                    .child_indices
                    .iter()
                    .any(|child| matched[child as usize])
            };
            matched.push(result);
            if result && !entry.ignored {
                activated.push(entry.patch_indices[0]);
            }
        }
        activated
    }

    #[test]
    fn lowering_preserves_activation_semantics() {
        let segment_definitions = [
            (1u32, codepoints(&[b'a' as u32, b'b' as u32])),
            (2, codepoints(&[b'c' as u32])),
            (3, codepoints(&[b'd' as u32, b'e' as u32, b'f' as u32])),
            (4, codepoints(&[b'g' as u32])),
        ];
        let segments: FnvHashMap<u32, SubsetDefinition> =
            segment_definitions.iter().cloned().collect();

        let conditions = vec![
            ActivationCondition::exclusive_segment(2, 2),
            ActivationCondition::exclusive_segment(3, 4),
            ActivationCondition::or_segments(&SegmentSet::from([1, 3]), 5),
            ActivationCondition::composite_condition(
                &[SegmentSet::from([1, 3]), SegmentSet::from([2, 4])],
                6,
            ),
        ];
        let entries = ActivationCondition::activation_conditions_to_patch_map_entries(
            &conditions,
            &segments,
        )
        .unwrap();

        // Try every subset of the segment universe; the entry table must
        // activate exactly the patches whose conditions are satisfied.
        for chosen_bits in 0u32..(1 << segment_definitions.len()) {
            let mut requested = CodepointSet::empty();
            let mut chosen = SegmentSet::empty();
            for (index, (segment_id, definition)) in segment_definitions.iter().enumerate() {
                if chosen_bits & (1 << index) != 0 {
                    chosen.insert(*segment_id);
                    requested.union(&definition.codepoints);
                }
            }

            let mut expected: Vec<u32> = conditions
                .iter()
                .filter(|condition| {
                    condition
                        .conditions()
                        .iter()
                        .all(|group| group.intersects(&chosen))
                })
                .map(|condition| condition.activated())
                .collect();
            expected.sort();

            let mut activated = evaluate_entries(&entries, &requested);
            activated.sort();
            assert_eq!(activated, expected, "for chosen segments {chosen:?}");
        }
    }

    #[test]
    fn lowering_missing_segment_fails() {
        let segments: FnvHashMap<u32, SubsetDefinition> = Default::default();
        let conditions = vec![ActivationCondition::exclusive_segment(0, 1)];
        assert!(matches!(
            ActivationCondition::activation_conditions_to_patch_map_entries(
                &conditions,
                &segments
            ),
            Err(SegmenterError::InvalidArgument(_))
        ));
    }
}
