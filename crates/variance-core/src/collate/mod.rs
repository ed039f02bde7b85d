//! Tokenization and pairwise collation of a comparison set.
//!
//! `tokenize` stores token annotations for every witness. `collate` diffs the
//! stored tokens of every witness pair and stores the differences as
//! alignments. Both own the set while they run: the set status is moved with a
//! compare-and-set, so a second job for a busy set is rejected.

pub mod diff;
pub mod difference;

use tracing::{debug, info, warn};

use crate::config::{CollatorConfig, EngineConfig};
use crate::error::{CollationError, StoreError};
use crate::model::{
    AlignmentClass, AlignmentFilter, AlignmentName, Annotation, AnnotationKind, NewAnnotation,
    Range, SetId, SetStatus, Witness, exclude,
};
use crate::store::{AnnotationQuery, Store};
use crate::task::TaskStatus;
use crate::tokenize::{TokenizeSummary, tokenize_batched};

use diff::{Hunk, levenshtein};
use difference::{Anchor, DiffSide, Difference, DifferenceBuffer};

/// Per-witness tokenization totals.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WitnessTokens {
    pub witness: crate::model::WitnessId,
    pub tokens: usize,
    pub tokenized_len: usize,
}

/// Totals for one collation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CollateSummary {
    pub pairs: usize,
    pub alignments: usize,
    pub transpositions: usize,
}

const IDLE: [SetStatus; 4] = [
    SetStatus::NotCollated,
    SetStatus::Tokenized,
    SetStatus::Collated,
    SetStatus::Error,
];

/// Runs tokenize and collate jobs against a store.
pub struct Collator<'a, S: Store + ?Sized> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: Store + ?Sized> Collator<'a, S> {
    pub const fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    // -----------------------------------------------------------------------
    // Tokenize
    // -----------------------------------------------------------------------

    /// Clear prior collation data and store fresh tokens for every witness.
    pub fn tokenize(
        &self,
        set: SetId,
        config: &CollatorConfig,
        status: &TaskStatus,
    ) -> Result<Vec<WitnessTokens>, CollationError> {
        let witnesses = self.store.witnesses_of(set)?;
        self.acquire(set, &IDLE, SetStatus::Tokenizing)?;

        let result = self.tokenize_witnesses(set, config, &witnesses, status);
        self.settle(set, &result, SetStatus::Tokenized)?;
        result
    }

    fn tokenize_witnesses(
        &self,
        set: SetId,
        config: &CollatorConfig,
        witnesses: &[Witness],
        status: &TaskStatus,
    ) -> Result<Vec<WitnessTokens>, CollationError> {
        status.set_note("Clearing old tokens");
        self.clear_computed(set)?;

        let segment = status.add_segment(1, witnesses.len());
        let mut totals = Vec::with_capacity(witnesses.len());
        for witness in witnesses {
            status.check_cancelled()?;
            status.set_note(format!("Tokenizing '{}'", witness.name));

            let len = self
                .store
                .text_len(witness.id)
                .map_err(|e| CollationError::io(witness.id, e))?;
            let text = self
                .store
                .read(witness.id, Range { start: 0, end: len })
                .map_err(|e| CollationError::io(witness.id, e))?;

            let fragment = witness.collation_range(len);
            let summary: TokenizeSummary = tokenize_batched(
                &text,
                fragment,
                config,
                self.config.tokenization_batch_size,
                |batch| {
                    debug!(witness_id = %witness.id, count = batch.len(), "Writing token batch");
                    let annotations = batch
                        .into_iter()
                        .map(|token| NewAnnotation {
                            set,
                            witness: witness.id,
                            kind: AnnotationKind::Token,
                            range: token.range,
                            text: Some(token.text),
                        })
                        .collect();
                    self.store.create_annotations(annotations).map(|_| ())
                },
            )?;

            info!(
                set_id = %set,
                witness_id = %witness.id,
                tokens = summary.tokens,
                tokenized_len = summary.tokenized_len,
                "Tokenized witness"
            );
            totals.push(WitnessTokens {
                witness: witness.id,
                tokens: summary.tokens,
                tokenized_len: summary.tokenized_len,
            });
            status.advance(segment);
        }
        Ok(totals)
    }

    // -----------------------------------------------------------------------
    // Collate
    // -----------------------------------------------------------------------

    /// Diff every witness pair of a tokenized set and store the differences.
    pub fn collate(&self, set: SetId, status: &TaskStatus) -> Result<CollateSummary, CollationError> {
        let witnesses = self.store.witnesses_of(set)?;
        if witnesses.len() < 2 {
            return Err(CollationError::TooFewWitnesses {
                set,
                count: witnesses.len(),
            });
        }
        self.acquire(set, &[SetStatus::Tokenized], SetStatus::Collating)?;

        let result = self.collate_pairs(set, &witnesses, status);
        self.settle(set, &result, SetStatus::Collated)?;
        result
    }

    fn collate_pairs(
        &self,
        set: SetId,
        witnesses: &[Witness],
        status: &TaskStatus,
    ) -> Result<CollateSummary, CollationError> {
        status.set_note("Clearing old alignments");
        self.store.clear(set)?;
        self.store.delete_annotations(set, &[AnnotationKind::Gap])?;

        let pairs: Vec<(&Witness, &Witness)> = witnesses
            .iter()
            .enumerate()
            .flat_map(|(i, base)| witnesses[i + 1..].iter().map(move |witness| (base, witness)))
            .collect();

        let segment = status.add_segment(4, pairs.len());
        let mut run = PairRun {
            buffer: DifferenceBuffer::new(set, self.config.collation_batch_size),
            next_group: 0,
            transpositions: 0,
        };

        for (base, witness) in &pairs {
            status.check_cancelled()?;
            status.set_note(format!("Collating '{}' vs '{}'", base.name, witness.name));
            info!(set_id = %set, base = %base.id, witness = %witness.id, "Collating pair");

            self.collate_pair(set, &mut run, base, witness)?;
            run.buffer.flush(self.store)?;
            status.advance(segment);
        }

        Ok(CollateSummary {
            pairs: pairs.len(),
            alignments: run.buffer.written(),
            transpositions: run.transpositions,
        })
    }

    fn collate_pair(
        &self,
        set: SetId,
        run: &mut PairRun,
        base: &Witness,
        witness: &Witness,
    ) -> Result<(), CollationError> {
        let base_range = self.collation_range(base)?;
        let witness_range = self.collation_range(witness)?;

        let transpositions = self.transpositions(set, base, witness, witness_range)?;
        let base_holes: Vec<Range> = transpositions.iter().map(|t| t.0).collect();
        let witness_holes: Vec<Range> = transpositions.iter().map(|t| t.1).collect();

        let base_tokens = self.tokens_in(set, base, &exclude(&[base_range], &base_holes))?;
        let witness_tokens =
            self.tokens_in(set, witness, &exclude(&[witness_range], &witness_holes))?;
        self.emit(
            run,
            Comparand::new(base, &base_tokens, base_range.start),
            Comparand::new(witness, &witness_tokens, witness_range.start),
        )?;

        for (base_span, witness_span) in transpositions {
            run.transpositions += 1;
            let base_tokens = self.tokens_in(set, base, &[base_span])?;
            let witness_tokens = self.tokens_in(set, witness, &[witness_span])?;
            // gaps at the head of a moved passage anchor to its first token
            let base_origin = base_tokens.first().map_or(base_span.start, |t| t.range.start);
            let witness_origin = witness_tokens
                .first()
                .map_or(witness_span.start, |t| t.range.start);
            self.emit(
                run,
                Comparand::new(base, &base_tokens, base_origin),
                Comparand::new(witness, &witness_tokens, witness_origin),
            )?;
        }
        Ok(())
    }

    /// Diff two token runs and buffer one difference per changed token. Each
    /// hunk becomes one group.
    fn emit(
        &self,
        run: &mut PairRun,
        base: Comparand<'_>,
        witness: Comparand<'_>,
    ) -> Result<(), CollationError> {
        if base.tokens.is_empty() && witness.tokens.is_empty() {
            return Ok(());
        }
        let hunks = diff::diff_oriented(base.tokens, witness.tokens, |a, b| a.text.cmp(&b.text));
        for hunk in hunks {
            run.next_group += 1;
            for difference in hunk_differences(&hunk, &base, &witness, run.next_group) {
                run.buffer.push(self.store, difference)?;
            }
        }
        Ok(())
    }

    /// Transpositions between `base` and `witness` whose witness side
    /// overlaps the witness collation range, as `(base span, witness span)`.
    fn transpositions(
        &self,
        set: SetId,
        base: &Witness,
        witness: &Witness,
        witness_range: Range,
    ) -> Result<Vec<(Range, Range)>, CollationError> {
        let filter = AlignmentFilter::new(AlignmentClass::Transpositions).with_base(base.id);
        let found = self
            .store
            .list_alignments(set, &filter)?
            .iter()
            .filter_map(|alignment| {
                let base_side = alignment.annotation_for(base.id)?;
                let other = alignment.other_than(base.id)?;
                (other.witness == witness.id && other.range.overlaps(&witness_range))
                    .then_some((base_side.range, other.range))
            })
            .collect::<Vec<_>>();
        if !found.is_empty() {
            debug!(base = %base.id, witness = %witness.id, count = found.len(), "Excluding transpositions");
        }
        Ok(found)
    }

    fn tokens_in(
        &self,
        set: SetId,
        witness: &Witness,
        ranges: &[Range],
    ) -> Result<Vec<Annotation>, CollationError> {
        let mut tokens = Vec::new();
        for range in ranges {
            let query = AnnotationQuery::tokens(witness.id).within(*range);
            tokens.extend(
                self.store
                    .list_annotations(set, &query)
                    .map_err(|e| CollationError::io(witness.id, e))?,
            );
        }
        Ok(tokens)
    }

    fn collation_range(&self, witness: &Witness) -> Result<Range, CollationError> {
        let len = self
            .store
            .text_len(witness.id)
            .map_err(|e| CollationError::io(witness.id, e))?;
        Ok(witness.collation_range(len))
    }

    // -----------------------------------------------------------------------
    // Status handling
    // -----------------------------------------------------------------------

    fn acquire(&self, set: SetId, from: &[SetStatus], to: SetStatus) -> Result<(), CollationError> {
        match self.store.compare_and_set_status(set, from, to) {
            Ok(_) => Ok(()),
            Err(StoreError::StatusConflict { actual, .. }) if actual.is_busy() => {
                Err(CollationError::SetBusy { set, status: actual })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record the outcome of a job. Cancellation discards computed data and
    /// returns the set to `not_collated`; other failures leave `error`.
    fn settle<T>(
        &self,
        set: SetId,
        result: &Result<T, CollationError>,
        done: SetStatus,
    ) -> Result<(), CollationError> {
        match result {
            Ok(_) => {
                self.store.update_status(set, done)?;
            }
            Err(err) if err.is_cancelled() => {
                info!(set_id = %set, "Job canceled; discarding computed data");
                let restored = self
                    .clear_computed(set)
                    .and_then(|()| {
                        self.store
                            .update_status(set, SetStatus::NotCollated)
                            .map_err(CollationError::from)
                    });
                if let Err(cleanup) = restored {
                    warn!(set_id = %set, error = %cleanup, "Failed to discard canceled run");
                }
            }
            Err(err) => {
                warn!(set_id = %set, code = %err.code(), error = %err, "Job failed");
                if let Err(status) = self.store.update_status(set, SetStatus::Error) {
                    warn!(set_id = %set, error = %status, "Failed to record error status");
                }
            }
        }
        Ok(())
    }

    /// Remove computed alignments, tokens and gaps. Manual alignments and
    /// their annotations stay.
    fn clear_computed(&self, set: SetId) -> Result<(), CollationError> {
        let alignments = self.store.clear(set)?;
        let annotations = self
            .store
            .delete_annotations(set, &[AnnotationKind::Token, AnnotationKind::Gap])?;
        debug!(set_id = %set, alignments, annotations, "Cleared computed collation data");
        Ok(())
    }
}

struct PairRun {
    buffer: DifferenceBuffer,
    next_group: u32,
    transpositions: usize,
}

/// One side of a comparison: its tokens and the offset used for a gap that
/// precedes the first token.
struct Comparand<'t> {
    witness: &'t Witness,
    tokens: &'t [Annotation],
    origin: usize,
}

impl<'t> Comparand<'t> {
    const fn new(witness: &'t Witness, tokens: &'t [Annotation], origin: usize) -> Self {
        Self {
            witness,
            tokens,
            origin,
        }
    }

    fn token(&self, index: usize) -> Option<DiffSide> {
        self.tokens.get(index).map(|token| DiffSide {
            witness: self.witness.id,
            anchor: Anchor::Token {
                annotation: token.id,
                range: token.range,
            },
        })
    }

    /// Gap before token `index`: the end of the previous token, or the origin.
    fn gap_before(&self, index: usize) -> DiffSide {
        let offset = index
            .checked_sub(1)
            .and_then(|prev| self.tokens.get(prev))
            .map_or(self.origin, |token| token.range.end);
        DiffSide {
            witness: self.witness.id,
            anchor: Anchor::Gap(offset),
        }
    }

    fn text(&self, index: usize) -> &str {
        self.tokens
            .get(index)
            .and_then(|t| t.text.as_deref())
            .unwrap_or_default()
    }
}

/// Walk one hunk: paired tokens become changes; leftover tokens on either
/// side are additions or deletions against a gap in the other witness.
fn hunk_differences(
    hunk: &Hunk,
    base: &Comparand<'_>,
    witness: &Comparand<'_>,
    group: u32,
) -> Vec<Difference> {
    let paired = hunk.base_len().min(hunk.witness_len());
    let mut out = Vec::with_capacity(hunk.base_len().max(hunk.witness_len()));

    for k in 0..paired {
        let (b, w) = (hunk.base_start + k, hunk.witness_start + k);
        let (Some(base_side), Some(witness_side)) = (base.token(b), witness.token(w)) else {
            continue;
        };
        let distance = levenshtein(base.text(b), witness.text(w));
        out.push(Difference {
            name: if distance > 0 {
                AlignmentName::Change
            } else {
                AlignmentName::AddDel
            },
            group,
            edit_distance: i32::try_from(distance).unwrap_or(i32::MAX),
            base: base_side,
            witness: witness_side,
        });
    }

    for b in hunk.base_start + paired..hunk.base_end {
        if let Some(base_side) = base.token(b) {
            out.push(Difference {
                name: AlignmentName::AddDel,
                group,
                edit_distance: -1,
                base: base_side,
                witness: witness.gap_before(hunk.witness_end),
            });
        }
    }

    for w in hunk.witness_start + paired..hunk.witness_end {
        if let Some(witness_side) = witness.token(w) {
            out.push(Difference {
                name: AlignmentName::AddDel,
                group,
                edit_distance: -1,
                base: base.gap_before(hunk.base_end),
                witness: witness_side,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Alignment, WitnessId};
    use crate::store::{AlignmentStore, AnnotationStore, MemoryStore, SetRepository};

    fn set_with(texts: &[&str]) -> (MemoryStore, SetId, Vec<WitnessId>) {
        let store = MemoryStore::new();
        let set = store.create_set("s", CollatorConfig::default()).expect("set");
        let ids = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let name = format!("W{i}");
                store.add_witness(set, &name, &name, text, None).expect("witness")
            })
            .collect();
        (store, set, ids)
    }

    fn run(store: &MemoryStore, set: SetId) -> CollateSummary {
        let config = EngineConfig::default();
        let collator = Collator::new(store, &config);
        let status = TaskStatus::new();
        collator
            .tokenize(set, &CollatorConfig::default(), &status)
            .expect("tokenize");
        collator.collate(set, &status).expect("collate")
    }

    fn differences(store: &MemoryStore, set: SetId) -> Vec<Alignment> {
        store
            .list_alignments(set, &AlignmentFilter::new(AlignmentClass::Differences))
            .expect("list")
    }

    #[test]
    fn single_word_substitution_is_one_change() {
        let (store, set, ids) = set_with(&["the cat sat", "the dog sat"]);
        let summary = run(&store, set);
        assert_eq!(summary.pairs, 1);

        let found = differences(&store, set);
        assert_eq!(found.len(), 1);
        let change = &found[0];
        assert_eq!(change.name, AlignmentName::Change);
        assert_eq!(change.edit_distance, 3);
        assert!(!change.manual);
        assert_eq!(change.annotation_for(ids[0]).map(|a| a.range), Some(Range { start: 4, end: 7 }));
        assert_eq!(change.annotation_for(ids[1]).map(|a| a.range), Some(Range { start: 4, end: 7 }));
        assert_eq!(store.set(set).expect("set").status, SetStatus::Collated);
    }

    #[test]
    fn insertion_is_anchored_after_the_preceding_token() {
        let (store, set, ids) = set_with(&["a c", "a b c"]);
        run(&store, set);

        let found = differences(&store, set);
        assert_eq!(found.len(), 1);
        let addition = &found[0];
        assert_eq!(addition.name, AlignmentName::AddDel);
        assert_eq!(addition.edit_distance, -1);
        assert_eq!(addition.annotation_for(ids[0]).map(|a| a.range), Some(Range::point(1)));
        assert_eq!(addition.annotation_for(ids[1]).map(|a| a.range), Some(Range { start: 2, end: 3 }));
    }

    #[test]
    fn leading_deletion_anchors_at_offset_zero() {
        let (store, set, ids) = set_with(&["old news", "news"]);
        run(&store, set);

        let found = differences(&store, set);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].annotation_for(ids[1]).map(|a| a.range), Some(Range::point(0)));
    }

    #[test]
    fn one_witness_is_rejected_without_touching_the_set() {
        let (store, set, _) = set_with(&["alone"]);
        let config = EngineConfig::default();
        let err = Collator::new(&store, &config)
            .collate(set, &TaskStatus::new())
            .expect_err("too few");
        assert!(matches!(err, CollationError::TooFewWitnesses { count: 1, .. }));
        assert_eq!(store.set(set).expect("set").status, SetStatus::NotCollated);
    }

    #[test]
    fn busy_set_rejects_a_second_job() {
        let (store, set, _) = set_with(&["a", "b"]);
        for step in [SetStatus::Tokenizing, SetStatus::Tokenized, SetStatus::Collating] {
            store.update_status(set, step).expect("status");
        }
        let config = EngineConfig::default();
        let err = Collator::new(&store, &config)
            .tokenize(set, &CollatorConfig::default(), &TaskStatus::new())
            .expect_err("busy");
        assert!(matches!(err, CollationError::SetBusy { status: SetStatus::Collating, .. }));
        assert_eq!(store.set(set).expect("set").status, SetStatus::Collating);
    }

    #[test]
    fn collating_an_untokenized_set_is_a_status_conflict() {
        let (store, set, _) = set_with(&["a", "b"]);
        let config = EngineConfig::default();
        let err = Collator::new(&store, &config)
            .collate(set, &TaskStatus::new())
            .expect_err("not tokenized");
        assert!(matches!(err, CollationError::Store(StoreError::StatusConflict { .. })));
    }

    #[test]
    fn cancellation_discards_the_run() {
        let (store, set, ids) = set_with(&["one two", "one three"]);
        let config = EngineConfig::default();
        let collator = Collator::new(&store, &config);
        collator
            .tokenize(set, &CollatorConfig::default(), &TaskStatus::new())
            .expect("tokenize");

        let status = TaskStatus::new();
        status.cancel();
        let err = collator.collate(set, &status).expect_err("canceled");
        assert!(err.is_cancelled());
        assert!(differences(&store, set).is_empty());
        assert!(
            store
                .list_annotations(set, &AnnotationQuery::tokens(ids[0]))
                .expect("tokens")
                .is_empty()
        );
        assert_eq!(store.set(set).expect("set").status, SetStatus::NotCollated);
    }

    #[test]
    fn groups_are_unique_across_pairs() {
        let (store, set, _) = set_with(&["a b c", "a x c", "a y c"]);
        let summary = run(&store, set);
        assert_eq!(summary.pairs, 3);

        let found = differences(&store, set);
        let mut groups: Vec<u32> = found.iter().map(|a| a.group).collect();
        groups.sort_unstable();
        groups.dedup();
        assert_eq!(groups.len(), found.len());
        assert!(!groups.contains(&0));
    }

    #[test]
    fn case_only_differences_vanish_under_case_filtering() {
        let (store, set, _) = set_with(&["The Cat", "the cat"]);
        run(&store, set);
        assert!(differences(&store, set).is_empty());
    }
}
