use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{Range, SetId, WitnessId};

/// Identity of a stored annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub i64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an annotation marks in a witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// A token produced by the tokenizer; carries normalized text.
    Token,
    /// A zero-length insertion/deletion point created during collation.
    Gap,
    /// A span referenced by a user-created transposition.
    Transposition,
}

impl AnnotationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Gap => "gap",
            Self::Transposition => "transposition",
        }
    }
}

impl FromStr for AnnotationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token" => Ok(Self::Token),
            "gap" => Ok(Self::Gap),
            "transposition" => Ok(Self::Transposition),
            other => Err(format!("unknown annotation kind '{other}'")),
        }
    }
}

/// A stored annotation over one witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub set: SetId,
    pub witness: WitnessId,
    pub kind: AnnotationKind,
    pub range: Range,
    /// Normalized token text; `None` for gaps and transposition spans.
    pub text: Option<String>,
}

/// An annotation that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnnotation {
    pub set: SetId,
    pub witness: WitnessId,
    pub kind: AnnotationKind,
    pub range: Range,
    pub text: Option<String>,
}

impl NewAnnotation {
    #[must_use]
    pub const fn gap(set: SetId, witness: WitnessId, offset: usize) -> Self {
        Self {
            set,
            witness,
            kind: AnnotationKind::Gap,
            range: Range::point(offset),
            text: None,
        }
    }

    #[must_use]
    pub fn with_id(self, id: AnnotationId) -> Annotation {
        Annotation {
            id,
            set: self.set,
            witness: self.witness,
            kind: self.kind,
            range: self.range,
            text: self.text,
        }
    }
}
