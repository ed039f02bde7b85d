use std::fmt;

use crate::model::{AnnotationId, InvalidTransition, SetId, SetStatus, WitnessId};

/// Machine-readable error codes for callers that poll job results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SetNotFound,
    WitnessNotFound,
    TooFewWitnesses,
    InvalidRange,
    InvalidStateTransition,
    SetBusy,
    TextUnreadable,
    StoreWriteFailed,
    CollationCanceled,
    InconsistentMergeState,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SetNotFound => "E2001",
            Self::WitnessNotFound => "E2002",
            Self::TooFewWitnesses => "E2003",
            Self::InvalidRange => "E2004",
            Self::InvalidStateTransition => "E2005",
            Self::SetBusy => "E3001",
            Self::TextUnreadable => "E5001",
            Self::StoreWriteFailed => "E5002",
            Self::CollationCanceled => "E6001",
            Self::InconsistentMergeState => "E9001",
            Self::InternalUnexpected => "E9002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SetNotFound => "Comparison set not found",
            Self::WitnessNotFound => "Witness not found",
            Self::TooFewWitnesses => "Comparison set needs at least two witnesses",
            Self::InvalidRange => "Malformed character range",
            Self::InvalidStateTransition => "Invalid set status transition",
            Self::SetBusy => "Comparison set is busy",
            Self::TextUnreadable => "Witness text unreadable",
            Self::StoreWriteFailed => "Store write failed",
            Self::CollationCanceled => "Job canceled",
            Self::InconsistentMergeState => "Inconsistent apparatus merge state",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::SetNotFound | Self::WitnessNotFound => None,
            Self::TooFewWitnesses => Some("Add another witness to the set before collating."),
            Self::InvalidRange => Some("Ranges must satisfy start <= end <= text length."),
            Self::InvalidStateTransition => {
                Some("Follow: not_collated -> tokenizing -> tokenized -> collating -> collated.")
            }
            Self::SetBusy => Some("Wait for the running tokenize/collate job to finish."),
            Self::TextUnreadable => Some("Check the witness source and re-collate."),
            Self::StoreWriteFailed => Some("Re-collate the set; prior alignments are cleared first."),
            Self::CollationCanceled => None,
            Self::InconsistentMergeState => Some("Re-collate the set. If persistent, report a bug with logs."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("comparison set {0} not found")]
    SetNotFound(SetId),

    #[error("witness {0} not found")]
    WitnessNotFound(WitnessId),

    #[error("annotation {0} not found")]
    AnnotationNotFound(AnnotationId),

    #[error("range [{start}, {end}) out of bounds for witness {witness} (length {len})")]
    OutOfBounds {
        witness: WitnessId,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("status of set {set} is {actual}, expected one of {expected:?}")]
    StatusConflict {
        set: SetId,
        actual: SetStatus,
        expected: Vec<SetStatus>,
    },

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("alignment in set {set} links witness {witness} to itself")]
    SelfAlignment { set: SetId, witness: WitnessId },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("cache payload encode/decode error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors raised by tokenize, collate and render jobs.
#[derive(Debug, thiserror::Error)]
pub enum CollationError {
    /// Witness text could not be read. The job is aborted and not retried.
    #[error("text of witness {witness} unreadable: {source}")]
    Io {
        witness: WitnessId,
        #[source]
        source: StoreError,
    },

    /// Cooperative cancellation was requested.
    #[error("job canceled")]
    Cancelled,

    /// Rejected before any job state was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Collation needs at least one witness pair.
    #[error("set {set} has {count} witnesses; at least two are required")]
    TooFewWitnesses { set: SetId, count: usize },

    /// A job for this set is already tokenizing or collating.
    #[error("set {set} is busy ({status})")]
    SetBusy { set: SetId, status: SetStatus },

    /// An apparatus unit references data no alignment accounts for.
    #[error("inconsistent merge state: {0}")]
    InconsistentMergeState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollationError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::TextUnreadable,
            Self::Cancelled => ErrorCode::CollationCanceled,
            Self::Validation(_) => ErrorCode::InvalidRange,
            Self::TooFewWitnesses { .. } => ErrorCode::TooFewWitnesses,
            Self::SetBusy { .. } => ErrorCode::SetBusy,
            Self::InconsistentMergeState(_) => ErrorCode::InconsistentMergeState,
            Self::Store(StoreError::SetNotFound(_)) => ErrorCode::SetNotFound,
            Self::Store(StoreError::WitnessNotFound(_)) => ErrorCode::WitnessNotFound,
            Self::Store(StoreError::StatusConflict { .. } | StoreError::Transition(_)) => {
                ErrorCode::InvalidStateTransition
            }
            Self::Store(StoreError::OutOfBounds { .. }) => ErrorCode::InvalidRange,
            Self::Store(StoreError::Sqlite(_) | StoreError::Codec(_)) => ErrorCode::StoreWriteFailed,
            Self::Store(
                StoreError::Poisoned
                | StoreError::AnnotationNotFound(_)
                | StoreError::SelfAlignment { .. },
            ) => ErrorCode::InternalUnexpected,
        }
    }

    /// Returns true when the error is the distinguished cancellation condition.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn io(witness: WitnessId, source: StoreError) -> Self {
        Self::Io { witness, source }
    }
}

#[cfg(test)]
mod tests {
    use super::{CollationError, ErrorCode, StoreError};
    use crate::model::WitnessId;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::SetNotFound,
            ErrorCode::WitnessNotFound,
            ErrorCode::TooFewWitnesses,
            ErrorCode::InvalidRange,
            ErrorCode::InvalidStateTransition,
            ErrorCode::SetBusy,
            ErrorCode::TextUnreadable,
            ErrorCode::StoreWriteFailed,
            ErrorCode::CollationCanceled,
            ErrorCode::InconsistentMergeState,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::SetBusy.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn cancellation_is_distinguished_from_failure() {
        assert!(CollationError::Cancelled.is_cancelled());
        let io = CollationError::io(WitnessId(3), StoreError::WitnessNotFound(WitnessId(3)));
        assert!(!io.is_cancelled());
        assert_eq!(io.code(), ErrorCode::TextUnreadable);
    }
}
