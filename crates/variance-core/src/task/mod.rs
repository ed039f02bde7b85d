//! Background jobs: identity, progress and cooperative cancellation.
//!
//! A [`Job`] is one unit of expensive work. Its [`TaskKey`] is derived from
//! the job parameters, so two requests for the same work share one key and at
//! most one of them runs. Progress is tracked by [`TaskStatus`], which workers
//! update and pollers snapshot.

mod manager;

pub use manager::{JobRunner, TaskManager};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollationError;
use crate::model::{SetId, WitnessId};

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Tokenize {
        set: SetId,
    },
    /// Tokenize, then collate every witness pair.
    Collate {
        set: SetId,
    },
    Apparatus {
        set: SetId,
        base: WitnessId,
        include: Vec<WitnessId>,
    },
    Histogram {
        set: SetId,
        base: WitnessId,
    },
}

impl Job {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tokenize { .. } => "tokenize",
            Self::Collate { .. } => "collate",
            Self::Apparatus { .. } => "apparatus",
            Self::Histogram { .. } => "histogram",
        }
    }

    #[must_use]
    pub const fn set(&self) -> SetId {
        match self {
            Self::Tokenize { set }
            | Self::Collate { set }
            | Self::Apparatus { set, .. }
            | Self::Histogram { set, .. } => *set,
        }
    }

    /// True for jobs that rewrite the set's annotations and alignments.
    #[must_use]
    pub const fn mutates_set(&self) -> bool {
        matches!(self, Self::Tokenize { .. } | Self::Collate { .. })
    }

    /// Deterministic key: job kind plus a blake3 digest of the parameters.
    /// Witness lists are compared as sets.
    #[must_use]
    pub fn key(&self) -> TaskKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind().as_bytes());
        hasher.update(&self.set().0.to_le_bytes());
        match self {
            Self::Tokenize { .. } | Self::Collate { .. } => {}
            Self::Apparatus { base, include, .. } => {
                hasher.update(&base.0.to_le_bytes());
                let mut include = include.clone();
                include.sort_unstable();
                include.dedup();
                for witness in include {
                    hasher.update(&witness.0.to_le_bytes());
                }
            }
            Self::Histogram { base, .. } => {
                hasher.update(&base.0.to_le_bytes());
            }
        }
        let digest = hasher.finalize().to_hex();
        TaskKey(format!("{}-{}", self.kind(), &digest[..16]))
    }
}

/// Identity of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(pub String);

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Processing,
    Complete,
    Failed,
    Canceled,
}

impl TaskState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Canceled)
    }
}

/// Handle for one progress segment, returned by [`TaskStatus::add_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentId(usize);

#[derive(Debug, Clone)]
struct Segment {
    weight: u32,
    total: usize,
    done: usize,
}

impl Segment {
    #[allow(clippy::cast_precision_loss)]
    fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.done.min(self.total) as f64 / self.total as f64
    }
}

#[derive(Debug)]
struct Progress {
    state: TaskState,
    note: String,
    segments: Vec<Segment>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Point-in-time view of a task, for polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub note: String,
    /// 0..=100.
    pub percent: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Shared progress and cancellation state of one task.
///
/// Progress is a list of weighted segments; each segment counts completed
/// steps out of a known total, so nested stages (tokenize, then collate)
/// report one combined percentage.
#[derive(Debug)]
pub struct TaskStatus {
    progress: Mutex<Progress>,
    cancelled: AtomicBool,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStatus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            progress: Mutex::new(Progress {
                state: TaskState::Pending,
                note: String::new(),
                segments: Vec::new(),
                started_at: None,
                ended_at: None,
                error: None,
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancellation point. Returns [`CollationError::Cancelled`] once
    /// [`Self::cancel`] has been called.
    pub fn check_cancelled(&self) -> Result<(), CollationError> {
        if self.is_cancelled() {
            Err(CollationError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn set_note(&self, note: impl Into<String>) {
        self.progress().note = note.into();
    }

    /// Add a segment of `total` steps carrying `weight` of the overall bar.
    pub fn add_segment(&self, weight: u32, total: usize) -> SegmentId {
        let mut progress = self.progress();
        progress.segments.push(Segment {
            weight,
            total,
            done: 0,
        });
        SegmentId(progress.segments.len() - 1)
    }

    /// Mark one more step of `segment` done.
    pub fn advance(&self, segment: SegmentId) {
        if let Some(segment) = self.progress().segments.get_mut(segment.0) {
            segment.done += 1;
        }
    }

    pub(crate) fn begin(&self) {
        let mut progress = self.progress();
        progress.state = TaskState::Processing;
        progress.started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&self, state: TaskState, error: Option<String>) {
        let mut progress = self.progress();
        progress.state = state;
        progress.ended_at = Some(Utc::now());
        progress.error = error;
        if state == TaskState::Complete {
            for segment in &mut progress.segments {
                segment.done = segment.total;
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.progress().state
    }

    /// When the task reached a finished state.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.progress().ended_at
    }

    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn snapshot(&self) -> TaskSnapshot {
        let progress = self.progress();
        let total_weight: u32 = progress.segments.iter().map(|s| s.weight).sum();
        let percent = if progress.state == TaskState::Complete {
            100
        } else if total_weight == 0 {
            0
        } else {
            let done: f64 = progress
                .segments
                .iter()
                .map(|s| f64::from(s.weight) * s.fraction())
                .sum();
            (done / f64::from(total_weight) * 100.0).floor().clamp(0.0, 100.0) as u8
        };

        TaskSnapshot {
            state: progress.state,
            note: progress.note.clone(),
            percent,
            started_at: progress.started_at,
            ended_at: progress.ended_at,
            error: progress.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_parameter_sensitive() {
        let a = Job::Histogram {
            set: SetId(1),
            base: WitnessId(2),
        };
        let b = Job::Histogram {
            set: SetId(1),
            base: WitnessId(3),
        };
        assert_eq!(a.key(), a.clone().key());
        assert_ne!(a.key(), b.key());
        assert!(a.key().0.starts_with("histogram-"));
    }

    #[test]
    fn apparatus_key_ignores_include_order() {
        let one = Job::Apparatus {
            set: SetId(1),
            base: WitnessId(1),
            include: vec![WitnessId(3), WitnessId(2)],
        };
        let two = Job::Apparatus {
            set: SetId(1),
            base: WitnessId(1),
            include: vec![WitnessId(2), WitnessId(3), WitnessId(3)],
        };
        assert_eq!(one.key(), two.key());
    }

    #[test]
    fn weighted_segments_combine() {
        let status = TaskStatus::new();
        let tokenize = status.add_segment(1, 2);
        let collate = status.add_segment(3, 3);
        status.advance(tokenize);
        status.advance(tokenize);
        assert_eq!(status.snapshot().percent, 25);

        status.advance(collate);
        assert_eq!(status.snapshot().percent, 50);
    }

    #[test]
    fn cancellation_is_observed_at_check_points() {
        let status = TaskStatus::new();
        assert!(status.check_cancelled().is_ok());
        status.cancel();
        assert!(status.check_cancelled().is_err_and(|e| e.is_cancelled()));
    }

    #[test]
    fn finishing_records_end_time_and_error() {
        let status = TaskStatus::new();
        status.begin();
        status.set_note("Collating A vs B");
        status.finish(TaskState::Failed, Some("boom".into()));

        let snap = status.snapshot();
        assert_eq!(snap.state, TaskState::Failed);
        assert_eq!(snap.note, "Collating A vs B");
        assert_eq!(snap.error.as_deref(), Some("boom"));
        assert!(snap.started_at.is_some() && snap.ended_at.is_some());
    }
}
