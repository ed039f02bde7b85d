use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{
    AlignmentStore, AnnotationQuery, AnnotationStore, CacheStore, SetRepository, TextSource,
    check_alignments, check_bounds, check_status, check_transition, page, slice_chars,
};
use crate::cache::{CacheEntry, CacheKey};
use crate::config::CollatorConfig;
use crate::error::StoreError;
use crate::model::{
    Alignment, AlignmentFilter, AlignmentId, Annotation, AnnotationId, AnnotationKind,
    ComparisonSet, NewAlignment, NewAnnotation, Range, SetId, SetStatus, Witness, WitnessId,
};

struct StoredWitness {
    set: SetId,
    witness: Witness,
    text: String,
    len: usize,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    sets: BTreeMap<SetId, ComparisonSet>,
    witnesses: BTreeMap<WitnessId, StoredWitness>,
    annotations: BTreeMap<AnnotationId, Annotation>,
    alignments: BTreeMap<AlignmentId, Alignment>,
    cache: HashMap<CacheKey, CacheEntry>,
}

impl Inner {
    const fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn witness(&self, id: WitnessId) -> Result<&StoredWitness, StoreError> {
        self.witnesses
            .get(&id)
            .ok_or(StoreError::WitnessNotFound(id))
    }

    fn set_mut(&mut self, id: SetId) -> Result<&mut ComparisonSet, StoreError> {
        self.sets.get_mut(&id).ok_or(StoreError::SetNotFound(id))
    }
}

/// Mutex-guarded in-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TextSource for MemoryStore {
    fn text_len(&self, witness: WitnessId) -> Result<usize, StoreError> {
        Ok(self.lock()?.witness(witness)?.len)
    }

    fn read(&self, witness: WitnessId, range: Range) -> Result<String, StoreError> {
        let inner = self.lock()?;
        let stored = inner.witness(witness)?;
        check_bounds(witness, range, stored.len)?;
        Ok(slice_chars(&stored.text, range))
    }
}

impl AnnotationStore for MemoryStore {
    fn create_annotations(
        &self,
        batch: Vec<NewAnnotation>,
    ) -> Result<Vec<AnnotationId>, StoreError> {
        let mut inner = self.lock()?;
        for new in &batch {
            let stored = inner.witness(new.witness)?;
            check_bounds(new.witness, new.range, stored.len)?;
        }

        let mut ids = Vec::with_capacity(batch.len());
        for new in batch {
            let id = AnnotationId(inner.next_id());
            inner.annotations.insert(id, new.with_id(id));
            ids.push(id);
        }
        Ok(ids)
    }

    fn list_annotations(
        &self,
        set: SetId,
        query: &AnnotationQuery,
    ) -> Result<Vec<Annotation>, StoreError> {
        let inner = self.lock()?;
        let mut found: Vec<Annotation> = inner
            .annotations
            .values()
            .filter(|a| a.set == set && query.matches(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.range, a.id));
        Ok(found)
    }

    fn delete_annotations(&self, set: SetId, kinds: &[AnnotationKind]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.annotations.len();
        inner
            .annotations
            .retain(|_, a| a.set != set || !kinds.contains(&a.kind));
        Ok(before - inner.annotations.len())
    }

    fn delete_annotation_ids(&self, ids: &[AnnotationId]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        Ok(ids
            .iter()
            .filter(|id| inner.annotations.remove(*id).is_some())
            .count())
    }
}

impl AlignmentStore for MemoryStore {
    fn create_alignments(&self, batch: Vec<NewAlignment>) -> Result<usize, StoreError> {
        check_alignments(&batch)?;
        let mut inner = self.lock()?;
        for new in &batch {
            for side in &new.annotations {
                if !inner.annotations.contains_key(&side.annotation) {
                    return Err(StoreError::AnnotationNotFound(side.annotation));
                }
            }
        }

        let count = batch.len();
        for new in batch {
            let id = AlignmentId(inner.next_id());
            inner.alignments.insert(id, new.with_id(id));
        }
        Ok(count)
    }

    fn list_alignments(
        &self,
        set: SetId,
        filter: &AlignmentFilter,
    ) -> Result<Vec<Alignment>, StoreError> {
        let inner = self.lock()?;
        let mut found: Vec<Alignment> = inner
            .alignments
            .values()
            .filter(|a| a.set == set && filter.accepts(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| filter.sort_key(a));
        Ok(page(found, filter.page))
    }

    fn clear(&self, set: SetId) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.alignments.len();
        inner.alignments.retain(|_, a| a.set != set || a.manual);
        Ok(before - inner.alignments.len())
    }
}

impl SetRepository for MemoryStore {
    fn create_set(&self, name: &str, config: CollatorConfig) -> Result<SetId, StoreError> {
        let mut inner = self.lock()?;
        let id = SetId(inner.next_id());
        inner.sets.insert(
            id,
            ComparisonSet {
                id,
                name: name.to_string(),
                config,
                status: SetStatus::NotCollated,
            },
        );
        Ok(id)
    }

    fn set(&self, id: SetId) -> Result<ComparisonSet, StoreError> {
        self.lock()?
            .sets
            .get(&id)
            .cloned()
            .ok_or(StoreError::SetNotFound(id))
    }

    fn sets(&self) -> Result<Vec<ComparisonSet>, StoreError> {
        Ok(self.lock()?.sets.values().cloned().collect())
    }

    fn add_witness(
        &self,
        set: SetId,
        name: &str,
        siglum: &str,
        text: &str,
        fragment: Option<Range>,
    ) -> Result<WitnessId, StoreError> {
        let mut inner = self.lock()?;
        inner.set_mut(set)?;

        let len = text.chars().count();
        let id = WitnessId(inner.next_id());
        if let Some(range) = fragment {
            check_bounds(id, range, len)?;
        }
        inner.witnesses.insert(
            id,
            StoredWitness {
                set,
                witness: Witness {
                    id,
                    name: name.to_string(),
                    siglum: siglum.to_string(),
                    fragment,
                },
                text: text.to_string(),
                len,
            },
        );
        Ok(id)
    }

    fn remove_witness(&self, witness: WitnessId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .witnesses
            .remove(&witness)
            .ok_or(StoreError::WitnessNotFound(witness))?;
        inner
            .alignments
            .retain(|_, a| a.annotations.iter().all(|side| side.witness != witness));
        inner.annotations.retain(|_, a| a.witness != witness);
        Ok(())
    }

    fn witnesses_of(&self, set: SetId) -> Result<Vec<Witness>, StoreError> {
        let inner = self.lock()?;
        if !inner.sets.contains_key(&set) {
            return Err(StoreError::SetNotFound(set));
        }
        Ok(inner
            .witnesses
            .values()
            .filter(|w| w.set == set)
            .map(|w| w.witness.clone())
            .collect())
    }

    fn update_status(&self, set: SetId, status: SetStatus) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.set_mut(set)?;
        check_transition(stored.status, status)?;
        stored.status = status;
        Ok(())
    }

    fn compare_and_set_status(
        &self,
        set: SetId,
        expected: &[SetStatus],
        next: SetStatus,
    ) -> Result<SetStatus, StoreError> {
        let mut inner = self.lock()?;
        let stored = inner.set_mut(set)?;
        let previous = stored.status;
        check_status(set, previous, expected)?;
        check_transition(previous, next)?;
        stored.status = next;
        Ok(previous)
    }
}

impl CacheStore for MemoryStore {
    fn cache_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.lock()?.cache.get(key).cloned())
    }

    fn cache_put(&self, key: &CacheKey, payload: &str) -> Result<(), StoreError> {
        self.lock()?.cache.insert(
            key.clone(),
            CacheEntry {
                payload: payload.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn cache_invalidate(&self, set: SetId) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.cache.len();
        inner.cache.retain(|key, _| key.set != set);
        Ok(before - inner.cache.len())
    }

    fn cache_purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.cache.len();
        inner.cache.retain(|_, entry| entry.created_at >= cutoff);
        Ok(before - inner.cache.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlignedAnnotation, AlignmentClass, AlignmentName, InvalidTransition};

    fn seeded() -> (MemoryStore, SetId, WitnessId, WitnessId) {
        let store = MemoryStore::new();
        let set = store
            .create_set("s", CollatorConfig::default())
            .expect("create set");
        let a = store
            .add_witness(set, "A", "A", "the cat sat", None)
            .expect("add A");
        let b = store
            .add_witness(set, "B", "B", "the dog sat", None)
            .expect("add B");
        (store, set, a, b)
    }

    fn annotate(store: &MemoryStore, set: SetId, w: WitnessId, kind: AnnotationKind, r: Range) -> AnnotationId {
        store
            .create_annotations(vec![NewAnnotation {
                set,
                witness: w,
                kind,
                range: r,
                text: None,
            }])
            .expect("create")[0]
    }

    #[test]
    fn read_slices_by_character() {
        let (store, _, a, _) = seeded();
        assert_eq!(store.text_len(a).expect("len"), 11);
        assert_eq!(store.read(a, Range { start: 4, end: 7 }).expect("read"), "cat");
        assert!(matches!(
            store.read(a, Range { start: 4, end: 70 }),
            Err(StoreError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn clear_keeps_manual_alignments() {
        let (store, set, a, b) = seeded();
        let x = annotate(&store, set, a, AnnotationKind::Transposition, Range { start: 0, end: 3 });
        let y = annotate(&store, set, b, AnnotationKind::Transposition, Range { start: 8, end: 11 });
        let side = |w, id, r| AlignedAnnotation {
            witness: w,
            annotation: id,
            range: r,
        };
        let manual = NewAlignment {
            set,
            name: AlignmentName::Transposition,
            group: 0,
            edit_distance: -1,
            manual: true,
            annotations: [
                side(a, x, Range { start: 0, end: 3 }),
                side(b, y, Range { start: 8, end: 11 }),
            ],
        };
        let computed = NewAlignment {
            name: AlignmentName::Change,
            manual: false,
            ..manual.clone()
        };
        store
            .create_alignments(vec![manual, computed])
            .expect("create alignments");

        assert_eq!(store.clear(set).expect("clear"), 1);
        let left = store
            .list_alignments(set, &AlignmentFilter::new(AlignmentClass::All))
            .expect("list");
        assert_eq!(left.len(), 1);
        assert!(left[0].manual);
    }

    #[test]
    fn alignment_linking_a_witness_to_itself_is_rejected() {
        let (store, set, a, b) = seeded();
        let x = annotate(&store, set, a, AnnotationKind::Token, Range { start: 0, end: 3 });
        let y = annotate(&store, set, b, AnnotationKind::Token, Range { start: 0, end: 3 });
        let side = |w, id| AlignedAnnotation {
            witness: w,
            annotation: id,
            range: Range { start: 0, end: 3 },
        };
        let good = NewAlignment {
            set,
            name: AlignmentName::Change,
            group: 1,
            edit_distance: 1,
            manual: false,
            annotations: [side(a, x), side(b, y)],
        };
        let looped = NewAlignment {
            annotations: [side(a, x), side(a, x)],
            ..good.clone()
        };

        let err = store
            .create_alignments(vec![good, looped])
            .expect_err("self alignment");
        assert!(matches!(err, StoreError::SelfAlignment { witness, .. } if witness == a));
        assert!(
            store
                .list_alignments(set, &AlignmentFilter::new(AlignmentClass::All))
                .expect("list")
                .is_empty()
        );
    }

    #[test]
    fn status_moves_follow_the_lifecycle() {
        let (store, set, _, _) = seeded();
        store
            .update_status(set, SetStatus::NotCollated)
            .expect("same status is a no-op");

        let err = store
            .update_status(set, SetStatus::Collated)
            .expect_err("cannot skip collation");
        assert!(matches!(
            err,
            StoreError::Transition(InvalidTransition {
                from: SetStatus::NotCollated,
                to: SetStatus::Collated,
                ..
            })
        ));
        assert_eq!(
            crate::error::CollationError::from(err).code(),
            crate::error::ErrorCode::InvalidStateTransition
        );

        let err = store
            .compare_and_set_status(set, &[SetStatus::NotCollated], SetStatus::Collating)
            .expect_err("collating needs tokens");
        assert!(matches!(err, StoreError::Transition(_)));
        assert_eq!(store.set(set).expect("set").status, SetStatus::NotCollated);
    }

    #[test]
    fn annotations_can_be_deleted_by_id() {
        let (store, set, a, _) = seeded();
        let x = annotate(&store, set, a, AnnotationKind::Token, Range { start: 0, end: 3 });
        let y = annotate(&store, set, a, AnnotationKind::Token, Range { start: 4, end: 7 });
        assert_eq!(store.delete_annotation_ids(&[x, AnnotationId(999)]).expect("delete"), 1);
        let left = store
            .list_annotations(set, &AnnotationQuery::tokens(a))
            .expect("list");
        assert_eq!(left.iter().map(|t| t.id).collect::<Vec<_>>(), vec![y]);
    }

    #[test]
    fn compare_and_set_rejects_unexpected_status() {
        let (store, set, _, _) = seeded();
        let previous = store
            .compare_and_set_status(set, &[SetStatus::NotCollated], SetStatus::Tokenizing)
            .expect("cas");
        assert_eq!(previous, SetStatus::NotCollated);

        let err = store
            .compare_and_set_status(set, &[SetStatus::NotCollated], SetStatus::Tokenizing)
            .expect_err("second cas must fail");
        assert!(matches!(
            err,
            StoreError::StatusConflict {
                actual: SetStatus::Tokenizing,
                ..
            }
        ));
    }

    #[test]
    fn annotations_outside_text_are_rejected_atomically() {
        let (store, set, a, _) = seeded();
        let batch = vec![
            NewAnnotation::gap(set, a, 3),
            NewAnnotation::gap(set, a, 300),
        ];
        assert!(store.create_annotations(batch).is_err());
        let gaps = store
            .list_annotations(
                set,
                &AnnotationQuery {
                    witness: a,
                    kind: AnnotationKind::Gap,
                    within: None,
                },
            )
            .expect("list");
        assert!(gaps.is_empty());
    }

    #[test]
    fn remove_witness_drops_its_annotations() {
        let (store, set, a, b) = seeded();
        annotate(&store, set, a, AnnotationKind::Token, Range { start: 0, end: 3 });
        store.remove_witness(a).expect("remove");
        assert_eq!(store.witnesses_of(set).expect("witnesses").len(), 1);
        assert_eq!(store.witnesses_of(set).expect("witnesses")[0].id, b);
        assert!(
            store
                .list_annotations(set, &AnnotationQuery::tokens(a))
                .expect("list")
                .is_empty()
        );
    }
}
