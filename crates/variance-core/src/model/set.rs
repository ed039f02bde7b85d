use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::Range;
use crate::config::CollatorConfig;

/// Identity of a comparison set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetId(pub i64);

/// Identity of a witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WitnessId(pub i64);

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WitnessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One copy of a document. Text lives behind [`crate::store::TextSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub id: WitnessId,
    pub name: String,
    /// Short label used in rendered apparatus rows.
    pub siglum: String,
    /// Optional sub-range restricting collation to part of the text.
    pub fragment: Option<Range>,
}

impl Witness {
    /// Effective collation range given the full text length.
    #[must_use]
    pub fn collation_range(&self, text_len: usize) -> Range {
        self.fragment.map_or(
            Range {
                start: 0,
                end: text_len,
            },
            |fragment| fragment.clamp_to(text_len),
        )
    }
}

/// Lifecycle of a comparison set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    NotCollated,
    Tokenizing,
    Tokenized,
    Collating,
    Collated,
    Error,
}

impl SetStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotCollated => "not_collated",
            Self::Tokenizing => "tokenizing",
            Self::Tokenized => "tokenized",
            Self::Collating => "collating",
            Self::Collated => "collated",
            Self::Error => "error",
        }
    }

    /// True while a tokenize or collate job owns the set.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Tokenizing | Self::Collating)
    }

    /// Validate whether a transition from self to `target` is allowed.
    ///
    /// Valid transitions:
    /// - any idle status -> `tokenizing`
    /// - `tokenizing -> tokenized`, `tokenized -> collating`,
    ///   `collating -> collated`
    /// - `tokenizing | collating -> error` (failure)
    /// - `tokenizing | collating -> not_collated` (cancellation)
    /// - any idle status -> `not_collated` (witness added or removed)
    pub fn can_transition_to(&self, target: Self) -> Result<(), InvalidTransition> {
        if *self == target {
            return Err(InvalidTransition {
                from: *self,
                to: target,
                reason: "no-op transition is not allowed",
            });
        }

        let allowed = match (*self, target) {
            (from, Self::Tokenizing) => !from.is_busy(),
            (Self::Tokenizing, Self::Tokenized) | (Self::Tokenized, Self::Collating) => true,
            (Self::Collating, Self::Collated) => true,
            (from, Self::Error | Self::NotCollated) => from.is_busy() || target == Self::NotCollated,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: *self,
                to: target,
                reason: "transition not allowed by collation lifecycle",
            })
        }
    }
}

impl fmt::Display for SetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not_collated" => Ok(Self::NotCollated),
            "tokenizing" => Ok(Self::Tokenizing),
            "tokenized" => Ok(Self::Tokenized),
            "collating" => Ok(Self::Collating),
            "collated" => Ok(Self::Collated),
            "error" => Ok(Self::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Unknown status string read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown set status '{0}'")]
pub struct ParseStatusError(pub String);

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move set from {from} to {to}: {reason}")]
pub struct InvalidTransition {
    pub from: SetStatus,
    pub to: SetStatus,
    pub reason: &'static str,
}

/// An unordered collection of witnesses compared under one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSet {
    pub id: SetId,
    pub name: String,
    pub config: CollatorConfig,
    pub status: SetStatus,
}

#[cfg(test)]
mod tests {
    use super::{Range, SetStatus, Witness, WitnessId};

    #[test]
    fn happy_path_lifecycle_is_allowed() {
        let path = [
            SetStatus::NotCollated,
            SetStatus::Tokenizing,
            SetStatus::Tokenized,
            SetStatus::Collating,
            SetStatus::Collated,
            SetStatus::Tokenizing,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn busy_set_cannot_start_another_job() {
        assert!(SetStatus::Collating.can_transition_to(SetStatus::Tokenizing).is_err());
        assert!(SetStatus::Tokenizing.can_transition_to(SetStatus::Collating).is_err());
    }

    #[test]
    fn error_is_reachable_only_from_in_progress_states() {
        assert!(SetStatus::Tokenizing.can_transition_to(SetStatus::Error).is_ok());
        assert!(SetStatus::Collating.can_transition_to(SetStatus::Error).is_ok());
        assert!(SetStatus::Collated.can_transition_to(SetStatus::Error).is_err());
    }

    #[test]
    fn cancellation_returns_to_not_collated() {
        assert!(SetStatus::Collating.can_transition_to(SetStatus::NotCollated).is_ok());
        assert!(SetStatus::Collated.can_transition_to(SetStatus::NotCollated).is_ok());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SetStatus::NotCollated,
            SetStatus::Tokenizing,
            SetStatus::Tokenized,
            SetStatus::Collating,
            SetStatus::Collated,
            SetStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<SetStatus>(), Ok(status));
        }
    }

    #[test]
    fn fragment_restricts_collation_range() {
        let mut w = Witness {
            id: WitnessId(1),
            name: "A".into(),
            siglum: "A".into(),
            fragment: None,
        };
        assert_eq!(w.collation_range(12), Range { start: 0, end: 12 });
        w.fragment = Some(Range { start: 4, end: 40 });
        assert_eq!(w.collation_range(12), Range { start: 4, end: 12 });
    }
}
