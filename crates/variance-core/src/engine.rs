//! Entry point tying the store, the collation pipeline, the artifact cache
//! and the background task manager together.
//!
//! Every operation is available synchronously (the caller supplies a
//! [`TaskStatus`]) and as a [`Job`] submitted to the worker pool.

use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::apparatus::{Apparatus, ApparatusBuilder};
use crate::cache::{ArtifactCache, ArtifactKind, CacheKey};
use crate::collate::{CollateSummary, Collator, WitnessTokens};
use crate::config::{CollatorConfig, EngineConfig};
use crate::error::{CollationError, StoreError};
use crate::histogram::{self, Histogram};
use crate::model::{
    AlignedAnnotation, AlignmentName, AnnotationId, AnnotationKind, NewAlignment, NewAnnotation,
    Range, SetId, SetStatus, WitnessId,
};
use crate::store::Store;
use crate::task::{Job, JobRunner, TaskKey, TaskManager, TaskSnapshot, TaskStatus};

/// Outcome of a tokenize-then-collate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollationReport {
    pub witnesses: Vec<WitnessTokens>,
    pub summary: CollateSummary,
}

/// Totals removed by [`Engine::housekeeping`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Housekeeping {
    pub expired_tasks: usize,
    pub purged_artifacts: usize,
}

/// Cache key component naming the witnesses an artifact was rendered for.
#[must_use]
pub fn witness_key(base: WitnessId, include: &[WitnessId]) -> String {
    if include.is_empty() {
        return format!("base={base};include=all");
    }
    let mut include = include.to_vec();
    include.sort_unstable();
    include.dedup();
    let ids: Vec<String> = include.iter().map(ToString::to_string).collect();
    format!("base={base};include={}", ids.join(","))
}

struct Runner {
    store: Arc<dyn Store>,
    config: EngineConfig,
    cache: ArtifactCache<dyn Store>,
}

impl Runner {
    fn collator(&self) -> Collator<'_, dyn Store> {
        Collator::new(&*self.store, &self.config)
    }

    fn tokenize(&self, set: SetId, status: &TaskStatus) -> Result<Vec<WitnessTokens>, CollationError> {
        let config = self.store.set(set)?.config;
        self.cache.invalidate(set)?;
        self.collator().tokenize(set, &config, status)
    }

    fn collate(&self, set: SetId, status: &TaskStatus) -> Result<CollationReport, CollationError> {
        let count = self.store.witnesses_of(set)?.len();
        if count < 2 {
            return Err(CollationError::TooFewWitnesses { set, count });
        }
        let witnesses = self.tokenize(set, status)?;
        self.cache.invalidate(set)?;
        let summary = self.collator().collate(set, status)?;
        info!(
            set_id = %set,
            pairs = summary.pairs,
            alignments = summary.alignments,
            transpositions = summary.transpositions,
            "Collation complete"
        );
        Ok(CollationReport { witnesses, summary })
    }

    fn apparatus(
        &self,
        set: SetId,
        base: WitnessId,
        include: &[WitnessId],
        status: &TaskStatus,
    ) -> Result<Apparatus, CollationError> {
        let key = CacheKey::new(set, witness_key(base, include), ArtifactKind::CriticalApparatus);
        if let Some(hit) = self.cache.get::<Apparatus>(&key)? {
            debug!(set_id = %set, base = %base, "Apparatus served from cache");
            return Ok(hit);
        }
        let epoch = self.cache.epoch(set)?;
        let apparatus =
            ApparatusBuilder::new(&*self.store, &self.config).build(set, base, include, status)?;
        self.cache.put(&key, &apparatus, epoch)?;
        Ok(apparatus)
    }

    fn histogram(
        &self,
        set: SetId,
        base: WitnessId,
        status: &TaskStatus,
    ) -> Result<Histogram, CollationError> {
        let key = CacheKey::new(set, witness_key(base, &[]), ArtifactKind::Histogram);
        if let Some(hit) = self.cache.get::<Histogram>(&key)? {
            debug!(set_id = %set, base = %base, "Histogram served from cache");
            return Ok(hit);
        }
        let epoch = self.cache.epoch(set)?;
        let histogram = histogram::histogram(
            &*self.store,
            set,
            base,
            self.config.apparatus_batch_size,
            status,
        )?;
        self.cache.put(&key, &histogram, epoch)?;
        Ok(histogram)
    }
}

impl JobRunner for Runner {
    fn run(&self, job: &Job, status: &TaskStatus) -> Result<(), CollationError> {
        match job {
            Job::Tokenize { set } => self.tokenize(*set, status).map(drop),
            Job::Collate { set } => self.collate(*set, status).map(drop),
            Job::Apparatus { set, base, include } => {
                self.apparatus(*set, *base, include, status).map(drop)
            }
            Job::Histogram { set, base } => self.histogram(*set, *base, status).map(drop),
        }
    }
}

/// Collation engine over one store.
pub struct Engine {
    runner: Arc<Runner>,
    tasks: TaskManager,
}

impl Engine {
    pub fn new<S: Store + 'static>(store: S, config: EngineConfig) -> Self {
        Self::with_store(Arc::new(store), config)
    }

    pub fn with_store(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let runner = Arc::new(Runner {
            cache: ArtifactCache::new(Arc::clone(&store)),
            store,
            config,
        });
        let expiry =
            Duration::seconds(i64::try_from(runner.config.task_expiry_secs).unwrap_or(i64::MAX));
        let tasks = TaskManager::new(Arc::clone(&runner), runner.config.workers, expiry);
        Self { runner, tasks }
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        &*self.runner.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.runner.config
    }

    // -----------------------------------------------------------------------
    // Set and witness management
    // -----------------------------------------------------------------------

    pub fn create_set(&self, name: &str, config: CollatorConfig) -> Result<SetId, CollationError> {
        if name.trim().is_empty() {
            return Err(CollationError::Validation("set name must not be empty".into()));
        }
        let set = self.runner.store.create_set(name, config)?;
        info!(set_id = %set, name, "Created comparison set");
        Ok(set)
    }

    /// Add a witness. The set's cached artifacts are dropped and it returns
    /// to `not_collated`.
    pub fn add_witness(
        &self,
        set: SetId,
        name: &str,
        siglum: &str,
        text: &str,
        fragment: Option<Range>,
    ) -> Result<WitnessId, CollationError> {
        self.ensure_idle(set)?;
        self.runner.cache.invalidate(set)?;
        let witness = self
            .runner
            .store
            .add_witness(set, name, siglum, text, fragment)?;
        self.runner.store.update_status(set, SetStatus::NotCollated)?;
        info!(set_id = %set, witness_id = %witness, name, "Added witness");
        Ok(witness)
    }

    /// Remove a witness with everything anchored on it.
    pub fn remove_witness(&self, set: SetId, witness: WitnessId) -> Result<(), CollationError> {
        self.ensure_idle(set)?;
        if !self
            .runner
            .store
            .witnesses_of(set)?
            .iter()
            .any(|w| w.id == witness)
        {
            return Err(StoreError::WitnessNotFound(witness).into());
        }
        self.runner.cache.invalidate(set)?;
        self.runner.store.remove_witness(witness)?;
        self.runner.store.update_status(set, SetStatus::NotCollated)?;
        info!(set_id = %set, witness_id = %witness, "Removed witness");
        Ok(())
    }

    /// Record a manual transposition between two spans of different
    /// witnesses. Later collations treat the spans as moved, not changed.
    pub fn add_transposition(
        &self,
        set: SetId,
        base: (WitnessId, Range),
        witness: (WitnessId, Range),
    ) -> Result<(), CollationError> {
        if base.0 == witness.0 {
            return Err(CollationError::Validation(
                "a transposition must link two different witnesses".into(),
            ));
        }
        let members = self.runner.store.witnesses_of(set)?;
        for (id, _) in [base, witness] {
            if !members.iter().any(|w| w.id == id) {
                return Err(StoreError::WitnessNotFound(id).into());
            }
        }
        self.ensure_idle(set)?;

        let annotation = |(witness, range): (WitnessId, Range)| NewAnnotation {
            set,
            witness,
            kind: AnnotationKind::Transposition,
            range,
            text: None,
        };
        let ids = self
            .runner
            .store
            .create_annotations(vec![annotation(base), annotation(witness)])?;
        let (base_id, witness_id) = match ids.as_slice() {
            [b, w] => (*b, *w),
            _ => {
                return Err(CollationError::InconsistentMergeState(
                    "transposition annotations were not both created".into(),
                ));
            }
        };

        let linked = self.link_transposition(
            set,
            (base.0, base.1, base_id),
            (witness.0, witness.1, witness_id),
        );
        if let Err(err) = linked {
            if let Err(cleanup) = self.runner.store.delete_annotation_ids(&[base_id, witness_id]) {
                warn!(set_id = %set, error = %cleanup, "Failed to remove transposition annotations");
            }
            return Err(err);
        }
        info!(set_id = %set, base = %base.0, witness = %witness.0, "Recorded transposition");
        Ok(())
    }

    /// Write the manual alignment joining two transposition annotations.
    fn link_transposition(
        &self,
        set: SetId,
        base: (WitnessId, Range, AnnotationId),
        witness: (WitnessId, Range, AnnotationId),
    ) -> Result<(), CollationError> {
        self.runner.cache.invalidate(set)?;
        self.runner.store.create_alignments(vec![NewAlignment {
            set,
            name: AlignmentName::Transposition,
            group: 0,
            edit_distance: -1,
            manual: true,
            annotations: [
                AlignedAnnotation {
                    witness: base.0,
                    annotation: base.2,
                    range: base.1,
                },
                AlignedAnnotation {
                    witness: witness.0,
                    annotation: witness.2,
                    range: witness.1,
                },
            ],
        }])?;
        Ok(())
    }

    fn ensure_idle(&self, set: SetId) -> Result<(), CollationError> {
        let status = self.runner.store.set(set)?.status;
        if status.is_busy() || !self.tasks.active_mutations(set).is_empty() {
            return Err(CollationError::SetBusy {
                set,
                status: busy_status(status),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Synchronous operations
    // -----------------------------------------------------------------------

    pub fn tokenize(&self, set: SetId, status: &TaskStatus) -> Result<Vec<WitnessTokens>, CollationError> {
        self.runner.tokenize(set, status)
    }

    /// Tokenize, then collate every witness pair.
    pub fn collate(&self, set: SetId, status: &TaskStatus) -> Result<CollationReport, CollationError> {
        self.runner.collate(set, status)
    }

    pub fn apparatus(
        &self,
        set: SetId,
        base: WitnessId,
        include: &[WitnessId],
        status: &TaskStatus,
    ) -> Result<Apparatus, CollationError> {
        self.runner.apparatus(set, base, include, status)
    }

    pub fn histogram(
        &self,
        set: SetId,
        base: WitnessId,
        status: &TaskStatus,
    ) -> Result<Histogram, CollationError> {
        self.runner.histogram(set, base, status)
    }

    /// Cached apparatus, if one was rendered since the last invalidation.
    pub fn cached_apparatus(
        &self,
        set: SetId,
        base: WitnessId,
        include: &[WitnessId],
    ) -> Result<Option<Apparatus>, CollationError> {
        let key = CacheKey::new(set, witness_key(base, include), ArtifactKind::CriticalApparatus);
        Ok(self.runner.cache.get(&key)?)
    }

    pub fn cached_histogram(
        &self,
        set: SetId,
        base: WitnessId,
    ) -> Result<Option<Histogram>, CollationError> {
        let key = CacheKey::new(set, witness_key(base, &[]), ArtifactKind::Histogram);
        Ok(self.runner.cache.get(&key)?)
    }

    // -----------------------------------------------------------------------
    // Background jobs
    // -----------------------------------------------------------------------

    /// Queue `job`. Resubmitting an unfinished job returns its key; a job
    /// that would rewrite a set another job is rewriting is rejected.
    pub fn submit(&self, job: Job) -> Result<TaskKey, CollationError> {
        let set = job.set();
        let current = self.runner.store.set(set)?.status;
        if job.mutates_set() {
            let key = job.key();
            let active = self.tasks.active_mutations(set);
            if !active.contains(&key) && (current.is_busy() || !active.is_empty()) {
                return Err(CollationError::SetBusy {
                    set,
                    status: busy_status(current),
                });
            }
        }
        if let Job::Collate { set } = &job {
            let count = self.runner.store.witnesses_of(*set)?.len();
            if count < 2 {
                return Err(CollationError::TooFewWitnesses { set: *set, count });
            }
        }
        self.tasks.submit(job)
    }

    #[must_use]
    pub fn task_status(&self, key: &TaskKey) -> Option<TaskSnapshot> {
        self.tasks.status(key)
    }

    pub fn cancel(&self, key: &TaskKey) -> bool {
        let cancelled = self.tasks.cancel(key);
        if cancelled {
            info!(task = %key, "Cancellation requested");
        }
        cancelled
    }

    /// Poll until the task finishes or `timeout` elapses. Returns the last
    /// snapshot, or `None` for an unknown key.
    #[must_use]
    pub fn wait(&self, key: &TaskKey, timeout: StdDuration) -> Option<TaskSnapshot> {
        let handle = self.tasks.handle(key)?;
        let deadline = Instant::now() + timeout;
        while !handle.state().is_finished() && Instant::now() < deadline {
            thread::sleep(StdDuration::from_millis(10));
        }
        Some(handle.snapshot())
    }

    /// Forget expired tasks and purge artifacts older than the cache
    /// lifespan.
    pub fn housekeeping(&self) -> Result<Housekeeping, CollationError> {
        let expired_tasks = self.tasks.expire_finished();
        let purged_artifacts = self.purge_expired()?;
        Ok(Housekeeping {
            expired_tasks,
            purged_artifacts,
        })
    }

    /// Drop cached artifacts older than `cache_lifespan_secs`.
    pub fn purge_expired(&self) -> Result<usize, CollationError> {
        let lifespan = Duration::seconds(
            i64::try_from(self.runner.config.cache_lifespan_secs).unwrap_or(i64::MAX),
        );
        let purged = self.runner.cache.purge_expired(lifespan)?;
        if purged > 0 {
            info!(purged, "Purged expired artifacts");
        }
        Ok(purged)
    }
}

/// Status reported for a set whose rewrite is queued but not yet started.
const fn busy_status(current: SetStatus) -> SetStatus {
    if current.is_busy() {
        current
    } else {
        SetStatus::Tokenizing
    }
}
