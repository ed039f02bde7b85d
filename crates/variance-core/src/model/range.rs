//! Half-open character ranges over witness text.
//!
//! Offsets count Unicode scalar values, not bytes, so every witness shares one
//! character-offset addressing scheme regardless of encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open range `[start, end)` of character offsets.
///
/// Ordering is start ascending, then end ascending, so `[0,0)` sorts before
/// `[0,1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    /// Create a range. Returns `None` when `start > end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Option<Self> {
        if start > end {
            None
        } else {
            Some(Self { start, end })
        }
    }

    /// Zero-length range at `offset`, the shape of a gap.
    #[must_use]
    pub const fn point(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when the two ranges share at least one character.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `other` lies entirely inside `self`.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest range covering both inputs.
    #[must_use]
    pub fn span(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Clip to `[0, len)`.
    #[must_use]
    pub fn clamp_to(&self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Subtract `holes` from `ranges`, returning the remaining non-empty pieces in
/// order. Both inputs may be unsorted.
#[must_use]
pub fn exclude(ranges: &[Range], holes: &[Range]) -> Vec<Range> {
    let mut holes: Vec<Range> = holes.iter().copied().filter(|h| !h.is_empty()).collect();
    holes.sort();

    let mut sorted = ranges.to_vec();
    sorted.sort();

    let mut out = Vec::with_capacity(sorted.len() + holes.len());
    for range in sorted {
        let mut cursor = range.start;
        for hole in holes.iter().filter(|h| h.overlaps(&range)) {
            if hole.start > cursor {
                out.push(Range {
                    start: cursor,
                    end: hole.start,
                });
            }
            cursor = cursor.max(hole.end);
        }
        if cursor < range.end {
            out.push(Range {
                start: cursor,
                end: range.end,
            });
        }
    }
    out
}
