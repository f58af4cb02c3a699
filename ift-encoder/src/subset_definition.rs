//! Subset definitions: the input space segments are expressed over.

use std::collections::{BTreeMap, BTreeSet};

use font_types::{Fixed, Tag};

use crate::int_set::CodepointSet;

/// A range on a single variation axis. The planner treats these opaquely; they
/// only participate in equality, hashing, and the set operations below.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AxisRange {
    pub min: Fixed,
    pub max: Fixed,
}

impl AxisRange {
    pub fn new(min: Fixed, max: Fixed) -> AxisRange {
        AxisRange { min, max }
    }

    fn union(&self, other: &AxisRange) -> AxisRange {
        AxisRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn intersection(&self, other: &AxisRange) -> Option<AxisRange> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then_some(AxisRange { min, max })
    }
}

/// Describes a font subset over codepoints, layout feature tags, and design
/// space.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SubsetDefinition {
    pub codepoints: CodepointSet,
    pub feature_tags: BTreeSet<Tag>,
    pub design_space: BTreeMap<Tag, AxisRange>,
}

impl SubsetDefinition {
    pub fn new(
        codepoints: CodepointSet,
        feature_tags: BTreeSet<Tag>,
        design_space: BTreeMap<Tag, AxisRange>,
    ) -> SubsetDefinition {
        SubsetDefinition {
            codepoints,
            feature_tags,
            design_space,
        }
    }

    /// A definition covering only the given codepoints.
    pub fn codepoints(codepoints: CodepointSet) -> SubsetDefinition {
        SubsetDefinition {
            codepoints,
            ..Default::default()
        }
    }

    /// A definition covering only the given feature tags.
    pub fn features<I: IntoIterator<Item = Tag>>(tags: I) -> SubsetDefinition {
        SubsetDefinition {
            feature_tags: tags.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.codepoints.is_empty() && self.feature_tags.is_empty() && self.design_space.is_empty()
    }

    /// Empties out this definition.
    pub fn clear(&mut self) {
        self.codepoints.clear();
        self.feature_tags.clear();
        self.design_space.clear();
    }

    /// Adds everything in `other` to this definition.
    pub fn union(&mut self, other: &SubsetDefinition) {
        self.codepoints.union(&other.codepoints);
        self.feature_tags.extend(other.feature_tags.iter().copied());
        for (tag, range) in &other.design_space {
            self.design_space
                .entry(*tag)
                .and_modify(|r| *r = r.union(range))
                .or_insert(*range);
        }
    }

    /// Removes everything in `other` from this definition.
    ///
    /// Axis ranges are opaque: an axis entry is removed only when `other`
    /// carries a range fully covering ours.
    pub fn subtract(&mut self, other: &SubsetDefinition) {
        self.codepoints.subtract(&other.codepoints);
        for tag in &other.feature_tags {
            self.feature_tags.remove(tag);
        }
        self.design_space.retain(|tag, range| {
            other
                .design_space
                .get(tag)
                .map(|o| !(o.min <= range.min && o.max >= range.max))
                .unwrap_or(true)
        });
    }

    /// Reduces this definition to its intersection with `other`.
    pub fn intersect(&mut self, other: &SubsetDefinition) {
        self.codepoints.intersect(&other.codepoints);
        self.feature_tags
            .retain(|tag| other.feature_tags.contains(tag));

        let mut design_space = BTreeMap::new();
        for (tag, range) in &self.design_space {
            if let Some(intersection) = other
                .design_space
                .get(tag)
                .and_then(|o| range.intersection(o))
            {
                design_space.insert(*tag, intersection);
            }
        }
        self.design_space = design_space;
    }
}

/// Layout features which are always retained by an incremental font without
/// needing to be requested, per the IFT feature tag registry
/// (<https://w3c.github.io/IFT/Overview.html#feature-tag-list>).
pub static DEFAULT_FEATURE_TAGS: &[Tag] = &[
    // common
    Tag::new(b"ccmp"),
    Tag::new(b"liga"),
    Tag::new(b"locl"),
    Tag::new(b"mark"),
    Tag::new(b"mkmk"),
    Tag::new(b"rlig"),
    Tag::new(b"rvrn"),
    // fractions
    Tag::new(b"dnom"),
    Tag::new(b"frac"),
    Tag::new(b"numr"),
    // horizontal
    Tag::new(b"calt"),
    Tag::new(b"clig"),
    Tag::new(b"curs"),
    Tag::new(b"kern"),
    Tag::new(b"rclt"),
    // vertical
    Tag::new(b"valt"),
    Tag::new(b"vert"),
    Tag::new(b"vkrn"),
    Tag::new(b"vpal"),
    Tag::new(b"vrt2"),
    Tag::new(b"vrtr"),
    // directionality
    Tag::new(b"ltra"),
    Tag::new(b"ltrm"),
    Tag::new(b"rtla"),
    Tag::new(b"rtlm"),
    // randomization and justification
    Tag::new(b"rand"),
    Tag::new(b"jalt"),
    // east asian spacing
    Tag::new(b"chws"),
    Tag::new(b"halt"),
    Tag::new(b"vchw"),
    Tag::new(b"vhal"),
    // arabic shaping
    Tag::new(b"cswh"),
    Tag::new(b"fin2"),
    Tag::new(b"fin3"),
    Tag::new(b"fina"),
    Tag::new(b"init"),
    Tag::new(b"isol"),
    Tag::new(b"med2"),
    Tag::new(b"medi"),
    Tag::new(b"mset"),
    Tag::new(b"stch"),
    // hangul
    Tag::new(b"ljmo"),
    Tag::new(b"tjmo"),
    Tag::new(b"vjmo"),
    // indic and related scripts
    Tag::new(b"abvf"),
    Tag::new(b"abvm"),
    Tag::new(b"abvs"),
    Tag::new(b"akhn"),
    Tag::new(b"blwf"),
    Tag::new(b"blwm"),
    Tag::new(b"blws"),
    Tag::new(b"cfar"),
    Tag::new(b"cjct"),
    Tag::new(b"dist"),
    Tag::new(b"half"),
    Tag::new(b"haln"),
    Tag::new(b"nukt"),
    Tag::new(b"pref"),
    Tag::new(b"pres"),
    Tag::new(b"pstf"),
    Tag::new(b"psts"),
    Tag::new(b"rkrf"),
    Tag::new(b"rphf"),
    Tag::new(b"vatu"),
];

/// Adds all of the default, always included items to a subset definition.
pub fn add_init_subset_defaults(subset_definition: &mut SubsetDefinition) {
    subset_definition
        .feature_tags
        .extend(DEFAULT_FEATURE_TAGS.iter().copied());
}
