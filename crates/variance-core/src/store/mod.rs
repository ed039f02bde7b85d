//! Storage contracts consumed by the collation pipeline.
//!
//! Two backends implement every trait: [`MemoryStore`] and
//! [`crate::db::SqliteStore`]. Batch writes are all-or-nothing per call.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, CacheKey};
use crate::config::CollatorConfig;
use crate::error::StoreError;
use crate::model::{
    Alignment, AlignmentFilter, Annotation, AnnotationId, AnnotationKind, ComparisonSet,
    NewAlignment, NewAnnotation, Range, SetId, SetStatus, Witness, WitnessId,
};

/// Read access to witness text.
pub trait TextSource {
    /// Length of the witness text in characters.
    fn text_len(&self, witness: WitnessId) -> Result<usize, StoreError>;

    /// Characters `[range.start, range.end)` of the witness text.
    fn read(&self, witness: WitnessId, range: Range) -> Result<String, StoreError>;
}

/// Selects annotations of one kind on one witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationQuery {
    pub witness: WitnessId,
    pub kind: AnnotationKind,
    /// Only annotations lying entirely inside this range.
    pub within: Option<Range>,
}

impl AnnotationQuery {
    #[must_use]
    pub const fn tokens(witness: WitnessId) -> Self {
        Self {
            witness,
            kind: AnnotationKind::Token,
            within: None,
        }
    }

    #[must_use]
    pub const fn within(mut self, range: Range) -> Self {
        self.within = Some(range);
        self
    }

    #[must_use]
    pub fn matches(&self, annotation: &Annotation) -> bool {
        annotation.witness == self.witness
            && annotation.kind == self.kind
            && self.within.is_none_or(|r| r.contains(&annotation.range))
    }
}

pub trait AnnotationStore {
    /// Insert a batch, returning ids in input order.
    fn create_annotations(&self, batch: Vec<NewAnnotation>)
    -> Result<Vec<AnnotationId>, StoreError>;

    /// Annotations matching `query`, ordered by range then id.
    fn list_annotations(
        &self,
        set: SetId,
        query: &AnnotationQuery,
    ) -> Result<Vec<Annotation>, StoreError>;

    /// Delete every annotation of `set` whose kind is in `kinds`. Returns the
    /// number removed.
    fn delete_annotations(&self, set: SetId, kinds: &[AnnotationKind]) -> Result<usize, StoreError>;

    /// Delete the listed annotations. Unknown ids are ignored.
    fn delete_annotation_ids(&self, ids: &[AnnotationId]) -> Result<usize, StoreError>;
}

pub trait AlignmentStore {
    /// Insert a batch, returning the number written.
    fn create_alignments(&self, batch: Vec<NewAlignment>) -> Result<usize, StoreError>;

    /// Alignments of `set` accepted by `filter`, in filter order.
    fn list_alignments(
        &self,
        set: SetId,
        filter: &AlignmentFilter,
    ) -> Result<Vec<Alignment>, StoreError>;

    /// Remove computed alignments of `set`. Manual alignments are kept.
    fn clear(&self, set: SetId) -> Result<usize, StoreError>;
}

pub trait SetRepository {
    fn create_set(&self, name: &str, config: CollatorConfig) -> Result<SetId, StoreError>;

    fn set(&self, id: SetId) -> Result<ComparisonSet, StoreError>;

    fn sets(&self) -> Result<Vec<ComparisonSet>, StoreError>;

    /// Store a witness with its full text. Witness text is immutable.
    fn add_witness(
        &self,
        set: SetId,
        name: &str,
        siglum: &str,
        text: &str,
        fragment: Option<Range>,
    ) -> Result<WitnessId, StoreError>;

    /// Remove a witness along with its annotations and alignments.
    fn remove_witness(&self, witness: WitnessId) -> Result<(), StoreError>;

    /// Witnesses of `set` ordered by id.
    fn witnesses_of(&self, set: SetId) -> Result<Vec<Witness>, StoreError>;

    /// Move `set` to `status`. Setting the current status again is a no-op;
    /// any other move must be allowed by [`SetStatus::can_transition_to`].
    fn update_status(&self, set: SetId, status: SetStatus) -> Result<(), StoreError>;

    /// Atomically move `set` to `next` if its current status is one of
    /// `expected`. Returns the previous status, or
    /// [`StoreError::StatusConflict`]. The move itself is validated like
    /// [`SetRepository::update_status`].
    fn compare_and_set_status(
        &self,
        set: SetId,
        expected: &[SetStatus],
        next: SetStatus,
    ) -> Result<SetStatus, StoreError>;
}

/// Persisted rendered artifacts.
pub trait CacheStore {
    fn cache_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    fn cache_put(&self, key: &CacheKey, payload: &str) -> Result<(), StoreError>;

    /// Drop every entry for `set`. Returns the number removed.
    fn cache_invalidate(&self, set: SetId) -> Result<usize, StoreError>;

    /// Drop entries created before `cutoff`. Returns the number removed.
    fn cache_purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Everything the engine needs from a backend.
pub trait Store:
    TextSource + AnnotationStore + AlignmentStore + SetRepository + CacheStore + Send + Sync
{
}

impl<T> Store for T where
    T: TextSource + AnnotationStore + AlignmentStore + SetRepository + CacheStore + Send + Sync
{
}

/// Slice `text` by character offsets.
pub(crate) fn slice_chars(text: &str, range: Range) -> String {
    text.chars().skip(range.start).take(range.len()).collect()
}

/// Reject ranges that fall outside a witness of `len` characters.
pub(crate) const fn check_bounds(
    witness: WitnessId,
    range: Range,
    len: usize,
) -> Result<(), StoreError> {
    if range.start > range.end || range.end > len {
        return Err(StoreError::OutOfBounds {
            witness,
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

/// Shared body of [`SetRepository::compare_and_set_status`].
pub(crate) fn check_status(
    set: SetId,
    actual: SetStatus,
    expected: &[SetStatus],
) -> Result<(), StoreError> {
    if expected.contains(&actual) {
        Ok(())
    } else {
        Err(StoreError::StatusConflict {
            set,
            actual,
            expected: expected.to_vec(),
        })
    }
}

/// Lifecycle check shared by both status setters.
pub(crate) fn check_transition(current: SetStatus, next: SetStatus) -> Result<(), StoreError> {
    if current == next {
        return Ok(());
    }
    current.can_transition_to(next)?;
    Ok(())
}

/// Reject a batch in which any alignment links a witness to itself.
pub(crate) fn check_alignments(batch: &[NewAlignment]) -> Result<(), StoreError> {
    match batch.iter().find(|new| !new.is_well_formed()) {
        Some(bad) => Err(StoreError::SelfAlignment {
            set: bad.set,
            witness: bad.annotations[0].witness,
        }),
        None => Ok(()),
    }
}

/// Apply paging to an already ordered list.
pub(crate) fn page<T>(items: Vec<T>, page: Option<(usize, usize)>) -> Vec<T> {
    match page {
        Some((offset, limit)) => items.into_iter().skip(offset).take(limit).collect(),
        None => items,
    }
}
