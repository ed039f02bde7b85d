//! Myers O(ND) edit scripts and Levenshtein distance.

use std::cmp::Ordering;

/// A maximal run of non-matching items: `base[base_start..base_end]` was
/// replaced by `witness[witness_start..witness_end]`. Either side may be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub base_start: usize,
    pub base_end: usize,
    pub witness_start: usize,
    pub witness_end: usize,
}

impl Hunk {
    #[must_use]
    pub const fn base_len(&self) -> usize {
        self.base_end - self.base_start
    }

    #[must_use]
    pub const fn witness_len(&self) -> usize {
        self.witness_end - self.witness_start
    }

    /// The same hunk seen from the other side.
    #[must_use]
    pub const fn swapped(self) -> Self {
        Self {
            base_start: self.witness_start,
            base_end: self.witness_end,
            witness_start: self.base_start,
            witness_end: self.base_end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Keep,
    Delete,
    Insert,
}

/// Compute the hunks turning `base` into `witness` under `eq`, in order.
pub fn diff<T, F>(base: &[T], witness: &[T], eq: F) -> Vec<Hunk>
where
    F: Fn(&T, &T) -> bool,
{
    let prefix = base
        .iter()
        .zip(witness)
        .take_while(|(a, b)| eq(a, b))
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(witness[prefix..].iter().rev())
        .take_while(|(a, b)| eq(a, b))
        .count();

    let a = &base[prefix..base.len() - suffix];
    let b = &witness[prefix..witness.len() - suffix];
    let edits = shortest_edit(a, b, &eq);
    collect_hunks(&edits, prefix)
}

/// Like [`diff`], but the edit script is always computed from the
/// lexicographically smaller sequence to the larger one under `cmp`, then
/// mapped back. Swapping `base` and `witness` yields the mirrored hunks.
pub fn diff_oriented<T, F>(base: &[T], witness: &[T], cmp: F) -> Vec<Hunk>
where
    F: Fn(&T, &T) -> Ordering,
{
    let eq = |a: &T, b: &T| cmp(a, b) == Ordering::Equal;
    if lexicographic(witness, base, &cmp) == Ordering::Less {
        diff(witness, base, eq)
            .into_iter()
            .map(Hunk::swapped)
            .collect()
    } else {
        diff(base, witness, eq)
    }
}

fn lexicographic<T, F>(a: &[T], b: &[T], cmp: &F) -> Ordering
where
    F: Fn(&T, &T) -> Ordering,
{
    a.iter()
        .zip(b)
        .map(|(x, y)| cmp(x, y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

/// Myers' greedy forward search with a saved frontier per edit distance,
/// then a backtrack from `(n, m)` to recover the edit script.
fn shortest_edit<T, F>(a: &[T], b: &[T], eq: &F) -> Vec<Edit>
where
    F: Fn(&T, &T) -> bool,
{
    let n = a.len();
    let m = b.len();
    if n == 0 {
        return vec![Edit::Insert; m];
    }
    if m == 0 {
        return vec![Edit::Delete; n];
    }

    let max = n + m;
    let offset = max + 1;
    let mut frontier = vec![0_usize; 2 * max + 3];
    let mut trace: Vec<Vec<usize>> = Vec::new();

    'search: for d in 0..=max {
        trace.push(frontier.clone());
        for step in 0..=d {
            // k runs over -d, -d+2, ..., d
            let k_index = offset + 2 * step - d;
            let down = step == 0 || (step != d && frontier[k_index - 1] < frontier[k_index + 1]);
            let mut x = if down {
                frontier[k_index + 1]
            } else {
                frontier[k_index - 1] + 1
            };
            // y = x - k, with k = k_index - offset
            let Some(mut y) = (x + offset).checked_sub(k_index) else {
                continue;
            };
            while x < n && y < m && eq(&a[x], &b[y]) {
                x += 1;
                y += 1;
            }
            frontier[k_index] = x;
            if x >= n && y >= m {
                break 'search;
            }
        }
    }

    backtrack(&trace, n, m, offset)
}

fn backtrack(trace: &[Vec<usize>], n: usize, m: usize, offset: usize) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(n + m);
    let (mut x, mut y) = (n, m);

    for (d, frontier) in trace.iter().enumerate().rev() {
        let k_index = x + offset - y;
        let first = k_index + d == offset;
        let last = k_index == offset + d;
        let down = first || (!last && frontier[k_index - 1] < frontier[k_index + 1]);
        let prev_k_index = if down { k_index + 1 } else { k_index - 1 };
        let prev_x = frontier[prev_k_index];
        let prev_y = (prev_x + offset).saturating_sub(prev_k_index);

        while x > prev_x && y > prev_y {
            edits.push(Edit::Keep);
            x -= 1;
            y -= 1;
        }
        if d == 0 {
            break;
        }
        if down {
            edits.push(Edit::Insert);
        } else {
            edits.push(Edit::Delete);
        }
        x = prev_x;
        y = prev_y;
    }
    while x > 0 && y > 0 {
        edits.push(Edit::Keep);
        x -= 1;
        y -= 1;
    }

    edits.reverse();
    edits
}

fn collect_hunks(edits: &[Edit], origin: usize) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut open: Option<Hunk> = None;
    let (mut i, mut j) = (origin, origin);

    for edit in edits {
        match edit {
            Edit::Keep => {
                hunks.extend(open.take());
                i += 1;
                j += 1;
            }
            Edit::Delete => {
                let hunk = open.get_or_insert(Hunk {
                    base_start: i,
                    base_end: i,
                    witness_start: j,
                    witness_end: j,
                });
                i += 1;
                hunk.base_end = i;
            }
            Edit::Insert => {
                let hunk = open.get_or_insert(Hunk {
                    base_start: i,
                    base_end: i,
                    witness_start: j,
                    witness_end: j,
                });
                j += 1;
                hunk.witness_end = j;
            }
        }
    }
    hunks.extend(open);
    hunks
}

/// Levenshtein distance between two strings, counted in characters.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    fn hunks(a: &str, b: &str) -> Vec<Hunk> {
        diff(&words(a), &words(b), |x, y| x == y)
    }

    fn h(bs: usize, be: usize, ws: usize, we: usize) -> Hunk {
        Hunk {
            base_start: bs,
            base_end: be,
            witness_start: ws,
            witness_end: we,
        }
    }

    #[test]
    fn identical_sequences_have_no_hunks() {
        assert!(hunks("a b c", "a b c").is_empty());
        assert!(hunks("", "").is_empty());
    }

    #[test]
    fn single_substitution() {
        assert_eq!(hunks("the cat sat", "the dog sat"), vec![h(1, 2, 1, 2)]);
    }

    #[test]
    fn pure_insertion_and_deletion() {
        assert_eq!(hunks("a c", "a b c"), vec![h(1, 1, 1, 2)]);
        assert_eq!(hunks("a b c", "a c"), vec![h(1, 2, 1, 1)]);
        assert_eq!(hunks("", "x y"), vec![h(0, 0, 0, 2)]);
        assert_eq!(hunks("x y", ""), vec![h(0, 2, 0, 0)]);
    }

    #[test]
    fn separate_changes_stay_separate() {
        assert_eq!(
            hunks("a b c d e", "a x c d y"),
            vec![h(1, 2, 1, 2), h(4, 5, 4, 5)]
        );
    }

    #[test]
    fn oriented_diff_mirrors_a_swapped_pair() {
        let (ab, ba) = (words("a b"), words("b a"));
        let forward = diff_oriented(&ab, &ba, Ord::cmp);
        let backward = diff_oriented(&ba, &ab, Ord::cmp);
        assert_eq!(
            backward,
            forward.iter().copied().map(Hunk::swapped).collect::<Vec<_>>()
        );
        // plain Myers prefers deletions first, so the raw scripts disagree
        let raw_backward: Vec<Hunk> = hunks("b a", "a b").into_iter().map(Hunk::swapped).collect();
        assert_ne!(hunks("a b", "b a"), raw_backward);
    }

    #[test]
    fn levenshtein_known_values() {
        assert_eq!(levenshtein("cat", "dog"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("café", "cafe"), 1);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    /// Replaying the hunks over `base` must reproduce `witness`.
    fn apply(base: &[u8], witness: &[u8], hunks: &[Hunk]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cursor = 0;
        for hunk in hunks {
            out.extend_from_slice(&base[cursor..hunk.base_start]);
            out.extend_from_slice(&witness[hunk.witness_start..hunk.witness_end]);
            cursor = hunk.base_end;
        }
        out.extend_from_slice(&base[cursor..]);
        out
    }

    proptest! {
        #[test]
        fn hunks_reconstruct_the_witness(
            base in proptest::collection::vec(0_u8..4, 0..24),
            witness in proptest::collection::vec(0_u8..4, 0..24),
        ) {
            let found = diff(&base, &witness, |a, b| a == b);
            prop_assert_eq!(apply(&base, &witness, &found), witness.clone());

            let unchanged: usize = base.len() - found.iter().map(Hunk::base_len).sum::<usize>();
            let inserted: usize = found.iter().map(Hunk::witness_len).sum();
            prop_assert_eq!(unchanged + inserted, witness.len());
        }

        #[test]
        fn swapping_sides_mirrors_hunk_sizes(
            base in proptest::collection::vec(0_u8..3, 0..16),
            witness in proptest::collection::vec(0_u8..3, 0..16),
        ) {
            let forward = diff(&base, &witness, |a, b| a == b);
            let backward = diff(&witness, &base, |a, b| a == b);
            let f: usize = forward.iter().map(|h| h.base_len() + h.witness_len()).sum();
            let b: usize = backward.iter().map(|h| h.base_len() + h.witness_len()).sum();
            prop_assert_eq!(f, b);
        }

        #[test]
        fn oriented_diff_is_symmetric(
            base in proptest::collection::vec(0_u8..3, 0..12),
            witness in proptest::collection::vec(0_u8..3, 0..12),
        ) {
            let forward = diff_oriented(&base, &witness, Ord::cmp);
            let backward: Vec<Hunk> = diff_oriented(&witness, &base, Ord::cmp)
                .into_iter()
                .map(Hunk::swapped)
                .collect();
            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(apply(&base, &witness, &forward), witness.clone());
        }
    }
}
