use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{AnnotationId, Range, SetId, WitnessId};

/// Identity of a stored alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlignmentId(pub i64);

impl fmt::Display for AlignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic name of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentName {
    Change,
    AddDel,
    Transposition,
}

impl AlignmentName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::AddDel => "add_del",
            Self::Transposition => "transposition",
        }
    }
}

impl FromStr for AlignmentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "change" => Ok(Self::Change),
            "add_del" => Ok(Self::AddDel),
            "transposition" => Ok(Self::Transposition),
            other => Err(format!("unknown alignment name '{other}'")),
        }
    }
}

/// One side of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignedAnnotation {
    pub witness: WitnessId,
    pub annotation: AnnotationId,
    pub range: Range,
}

/// A stored correspondence between spans of two different witnesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    pub id: AlignmentId,
    pub set: SetId,
    pub name: AlignmentName,
    /// 0 means ungrouped; nonzero ids cluster parts of one variant.
    pub group: u32,
    /// Edit distance for near matches, -1 when not applicable.
    pub edit_distance: i32,
    /// User-created rather than computed.
    pub manual: bool,
    pub annotations: [AlignedAnnotation; 2],
}

impl Alignment {
    /// The side of this alignment belonging to `witness`, if any.
    #[must_use]
    pub fn annotation_for(&self, witness: WitnessId) -> Option<&AlignedAnnotation> {
        self.annotations.iter().find(|a| a.witness == witness)
    }

    /// The side of this alignment that does not belong to `witness`.
    #[must_use]
    pub fn other_than(&self, witness: WitnessId) -> Option<&AlignedAnnotation> {
        self.annotations.iter().find(|a| a.witness != witness)
    }
}

/// An alignment that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlignment {
    pub set: SetId,
    pub name: AlignmentName,
    pub group: u32,
    pub edit_distance: i32,
    pub manual: bool,
    pub annotations: [AlignedAnnotation; 2],
}

impl NewAlignment {
    /// Both sides must belong to different witnesses.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.annotations[0].witness.0 != self.annotations[1].witness.0
    }

    #[must_use]
    pub fn with_id(self, id: AlignmentId) -> Alignment {
        Alignment {
            id,
            set: self.set,
            name: self.name,
            group: self.group,
            edit_distance: self.edit_distance,
            manual: self.manual,
            annotations: self.annotations,
        }
    }
}

/// Classifier selecting which alignment names a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentClass {
    /// `CHANGE` and `ADD_DEL`.
    Differences,
    /// `TRANSPOSITION`.
    Transpositions,
    All,
}

impl AlignmentClass {
    #[must_use]
    pub const fn matches(self, name: AlignmentName) -> bool {
        match self {
            Self::Differences => matches!(name, AlignmentName::Change | AlignmentName::AddDel),
            Self::Transpositions => matches!(name, AlignmentName::Transposition),
            Self::All => true,
        }
    }
}

/// Listing constraints for [`crate::store::AlignmentStore::list_alignments`].
///
/// With a `base` witness, results are the alignments touching that witness,
/// ordered by the base-side range (start, then end) and then by id; without a
/// base they are ordered by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentFilter {
    pub class: AlignmentClass,
    pub base: Option<WitnessId>,
    /// Alignments whose other side is one of these witnesses are skipped.
    pub excluded: Vec<WitnessId>,
    /// `(offset, limit)` paging over the ordered result.
    pub page: Option<(usize, usize)>,
}

impl AlignmentFilter {
    #[must_use]
    pub const fn new(class: AlignmentClass) -> Self {
        Self {
            class,
            base: None,
            excluded: Vec::new(),
            page: None,
        }
    }

    #[must_use]
    pub const fn with_base(mut self, base: WitnessId) -> Self {
        self.base = Some(base);
        self
    }

    #[must_use]
    pub fn excluding(mut self, witnesses: impl IntoIterator<Item = WitnessId>) -> Self {
        self.excluded.extend(witnesses);
        self
    }

    #[must_use]
    pub const fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.page = Some((offset, limit));
        self
    }

    /// Apply every constraint except paging.
    #[must_use]
    pub fn accepts(&self, alignment: &Alignment) -> bool {
        if !self.class.matches(alignment.name) {
            return false;
        }
        let Some(base) = self.base else {
            return true;
        };
        if alignment.annotation_for(base).is_none() {
            return false;
        }
        alignment
            .other_than(base)
            .is_some_and(|other| !self.excluded.contains(&other.witness))
    }

    /// Sort key used for base-relative ordering.
    #[must_use]
    pub fn sort_key(&self, alignment: &Alignment) -> (Range, AlignmentId) {
        let range = self
            .base
            .and_then(|base| alignment.annotation_for(base))
            .map_or(Range::point(0), |a| a.range);
        (range, alignment.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(witness: i64, annotation: i64, start: usize, end: usize) -> AlignedAnnotation {
        AlignedAnnotation {
            witness: WitnessId(witness),
            annotation: AnnotationId(annotation),
            range: Range { start, end },
        }
    }

    fn alignment(id: i64, name: AlignmentName, a: AlignedAnnotation, b: AlignedAnnotation) -> Alignment {
        Alignment {
            id: AlignmentId(id),
            set: SetId(1),
            name,
            group: 1,
            edit_distance: -1,
            manual: false,
            annotations: [a, b],
        }
    }

    #[test]
    fn filter_selects_by_class_base_and_exclusion() {
        let change = alignment(1, AlignmentName::Change, side(1, 10, 0, 3), side(2, 20, 0, 3));
        let other_pair = alignment(2, AlignmentName::AddDel, side(2, 21, 4, 4), side(3, 30, 4, 8));
        let excluded = alignment(3, AlignmentName::AddDel, side(1, 11, 5, 5), side(3, 31, 5, 9));
        let moved = alignment(4, AlignmentName::Transposition, side(1, 12, 0, 3), side(2, 22, 6, 9));

        let filter = AlignmentFilter::new(AlignmentClass::Differences)
            .with_base(WitnessId(1))
            .excluding([WitnessId(3)]);

        assert!(filter.accepts(&change));
        assert!(!filter.accepts(&other_pair));
        assert!(!filter.accepts(&excluded));
        assert!(!filter.accepts(&moved));
        assert!(AlignmentFilter::new(AlignmentClass::Transpositions).accepts(&moved));
    }

    #[test]
    fn same_witness_on_both_sides_is_malformed() {
        let bad = NewAlignment {
            set: SetId(1),
            name: AlignmentName::Change,
            group: 0,
            edit_distance: 1,
            manual: false,
            annotations: [side(1, 1, 0, 1), side(1, 2, 2, 3)],
        };
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn base_relative_sort_key_puts_gaps_first() {
        let filter = AlignmentFilter::new(AlignmentClass::All).with_base(WitnessId(1));
        let gap = alignment(9, AlignmentName::AddDel, side(1, 1, 4, 4), side(2, 2, 4, 7));
        let word = alignment(2, AlignmentName::Change, side(1, 3, 4, 7), side(2, 4, 4, 7));
        assert!(filter.sort_key(&gap) < filter.sort_key(&word));
    }
}
