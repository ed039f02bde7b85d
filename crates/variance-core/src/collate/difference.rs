//! Buffered differences and gap materialization.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::CollationError;
use crate::model::{
    AlignedAnnotation, AlignmentName, AnnotationId, NewAlignment, NewAnnotation, Range, SetId,
    WitnessId,
};
use crate::store::{AlignmentStore, AnnotationStore};

/// Where one side of a difference sits in its witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// An existing token annotation.
    Token { annotation: AnnotationId, range: Range },
    /// A zero-length insertion/deletion point, not yet stored.
    Gap(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffSide {
    pub witness: WitnessId,
    pub anchor: Anchor,
}

impl DiffSide {
    const fn gap_key(&self) -> Option<(WitnessId, usize)> {
        match self.anchor {
            Anchor::Gap(offset) => Some((self.witness, offset)),
            Anchor::Token { .. } => None,
        }
    }
}

/// One computed difference between a base and a witness span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Difference {
    pub name: AlignmentName,
    pub group: u32,
    pub edit_distance: i32,
    pub base: DiffSide,
    pub witness: DiffSide,
}

/// Accumulates differences and writes them as alignment batches.
///
/// Gaps are materialized on flush through an offset table keyed by
/// `(witness, offset)`, so every difference anchored at the same gap in a run
/// references one stored annotation.
pub struct DifferenceBuffer {
    set: SetId,
    batch_size: usize,
    pending: Vec<Difference>,
    gaps: HashMap<(WitnessId, usize), AnnotationId>,
    written: usize,
}

impl DifferenceBuffer {
    #[must_use]
    pub fn new(set: SetId, batch_size: usize) -> Self {
        Self {
            set,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            gaps: HashMap::new(),
            written: 0,
        }
    }

    /// Buffer `difference`, flushing when the batch is full.
    pub fn push<S>(&mut self, store: &S, difference: Difference) -> Result<(), CollationError>
    where
        S: AnnotationStore + AlignmentStore + ?Sized,
    {
        self.pending.push(difference);
        if self.pending.len() >= self.batch_size {
            self.flush(store)?;
        }
        Ok(())
    }

    /// Materialize pending gaps, then write pending differences as one
    /// alignment batch. Returns the number of alignments written.
    pub fn flush<S>(&mut self, store: &S) -> Result<usize, CollationError>
    where
        S: AnnotationStore + AlignmentStore + ?Sized,
    {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let missing: BTreeSet<(WitnessId, usize)> = self
            .pending
            .iter()
            .flat_map(|d| [d.base.gap_key(), d.witness.gap_key()])
            .flatten()
            .filter(|key| !self.gaps.contains_key(key))
            .collect();
        if !missing.is_empty() {
            let batch = missing
                .iter()
                .map(|&(witness, offset)| NewAnnotation::gap(self.set, witness, offset))
                .collect();
            let ids = store.create_annotations(batch)?;
            self.gaps.extend(missing.into_iter().zip(ids));
        }

        let alignments = self
            .pending
            .iter()
            .map(|d| {
                Ok(NewAlignment {
                    set: self.set,
                    name: d.name,
                    group: d.group,
                    edit_distance: d.edit_distance,
                    manual: false,
                    annotations: [self.resolve(&d.base)?, self.resolve(&d.witness)?],
                })
            })
            .collect::<Result<Vec<_>, CollationError>>()?;

        let count = store.create_alignments(alignments)?;
        self.pending.clear();
        self.written += count;
        debug!(set_id = %self.set, count, total = self.written, "Flushed alignment batch");
        Ok(count)
    }

    fn resolve(&self, side: &DiffSide) -> Result<AlignedAnnotation, CollationError> {
        match side.anchor {
            Anchor::Token { annotation, range } => Ok(AlignedAnnotation {
                witness: side.witness,
                annotation,
                range,
            }),
            Anchor::Gap(offset) => {
                let annotation = self.gaps.get(&(side.witness, offset)).copied().ok_or_else(|| {
                    CollationError::InconsistentMergeState(format!(
                        "gap at {offset} in witness {} was not materialized",
                        side.witness
                    ))
                })?;
                Ok(AlignedAnnotation {
                    witness: side.witness,
                    annotation,
                    range: Range::point(offset),
                })
            }
        }
    }

    /// Stored annotation for the gap at `offset`, once flushed.
    #[must_use]
    pub fn gap_annotation(&self, witness: WitnessId, offset: usize) -> Option<AnnotationId> {
        self.gaps.get(&(witness, offset)).copied()
    }

    /// Alignments written so far.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollatorConfig;
    use crate::model::{AlignmentClass, AlignmentFilter, AnnotationKind};
    use crate::store::{AnnotationQuery, MemoryStore, SetRepository};

    fn token(store: &MemoryStore, set: SetId, witness: WitnessId, start: usize, end: usize) -> DiffSide {
        let range = Range { start, end };
        let id = store
            .create_annotations(vec![NewAnnotation {
                set,
                witness,
                kind: AnnotationKind::Token,
                range,
                text: None,
            }])
            .expect("create token")[0];
        DiffSide {
            witness,
            anchor: Anchor::Token {
                annotation: id,
                range,
            },
        }
    }

    fn add_del(base: DiffSide, witness: DiffSide) -> Difference {
        Difference {
            name: AlignmentName::AddDel,
            group: 1,
            edit_distance: -1,
            base,
            witness,
        }
    }

    #[test]
    fn same_gap_offset_shares_one_annotation_across_batches() {
        let store = MemoryStore::new();
        let set = store.create_set("s", CollatorConfig::default()).expect("set");
        let a = store.add_witness(set, "A", "A", "one two three", None).expect("A");
        let b = store.add_witness(set, "B", "B", "one", None).expect("B");
        let gap = DiffSide {
            witness: b,
            anchor: Anchor::Gap(3),
        };

        let mut buffer = DifferenceBuffer::new(set, 1);
        buffer
            .push(&store, add_del(token(&store, set, a, 4, 7), gap))
            .expect("push");
        buffer
            .push(&store, add_del(token(&store, set, a, 8, 13), gap))
            .expect("push");
        assert_eq!(buffer.written(), 2);

        let gaps = store
            .list_annotations(
                set,
                &AnnotationQuery {
                    witness: b,
                    kind: AnnotationKind::Gap,
                    within: None,
                },
            )
            .expect("list");
        assert_eq!(gaps.len(), 1);

        let alignments = store
            .list_alignments(set, &AlignmentFilter::new(AlignmentClass::All))
            .expect("list");
        let ids: BTreeSet<AnnotationId> = alignments
            .iter()
            .filter_map(|al| al.annotation_for(b).map(|side| side.annotation))
            .collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(buffer.gap_annotation(b, 3), ids.into_iter().next());
    }

    #[test]
    fn flush_without_pending_writes_nothing() {
        let store = MemoryStore::new();
        let mut buffer = DifferenceBuffer::new(SetId(1), 10);
        assert_eq!(buffer.flush(&store).expect("flush"), 0);
        assert_eq!(buffer.pending(), 0);
    }
}
