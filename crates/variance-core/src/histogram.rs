//! Per-character difference density relative to a base witness.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CollationError, StoreError};
use crate::model::{AlignmentClass, AlignmentFilter, Range, SetId, WitnessId};
use crate::store::Store;
use crate::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub set: SetId,
    pub base: WitnessId,
    pub witness_count: usize,
    /// One value in `[0, 1]` per base character.
    pub values: Vec<f64>,
}

impl Histogram {
    /// Highest value, or 0 for an empty base text.
    #[must_use]
    pub fn peak(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }
}

/// Count how many ranges cover each offset of a `len`-character text, scaled
/// by `1 / witness_count` and clamped to 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn density<I>(len: usize, ranges: I, witness_count: usize) -> Vec<f64>
where
    I: IntoIterator<Item = Range>,
{
    let mut counts = vec![0_u32; len];
    for range in ranges {
        let range = range.clamp_to(len);
        for count in &mut counts[range.start..range.end] {
            *count = count.saturating_add(1);
        }
    }
    let scale = 1.0 / witness_count.max(1) as f64;
    counts
        .into_iter()
        .map(|count| (f64::from(count) * scale).min(1.0))
        .collect()
}

/// Build the histogram of every difference anchored at `base`.
pub fn histogram<S: Store + ?Sized>(
    store: &S,
    set: SetId,
    base: WitnessId,
    batch_size: usize,
    status: &TaskStatus,
) -> Result<Histogram, CollationError> {
    let witnesses = store.witnesses_of(set)?;
    if !witnesses.iter().any(|w| w.id == base) {
        return Err(StoreError::WitnessNotFound(base).into());
    }
    let len = store
        .text_len(base)
        .map_err(|e| CollationError::io(base, e))?;

    let batch_size = batch_size.max(1);
    let mut ranges = Vec::new();
    let mut offset = 0;
    loop {
        status.check_cancelled()?;
        let filter = AlignmentFilter::new(AlignmentClass::Differences)
            .with_base(base)
            .with_page(offset, batch_size);
        let batch = store.list_alignments(set, &filter)?;
        debug!(set_id = %set, offset, count = batch.len(), "Fetched histogram batch");
        ranges.extend(
            batch
                .iter()
                .filter_map(|alignment| alignment.annotation_for(base).map(|side| side.range)),
        );
        if batch.len() < batch_size {
            break;
        }
        offset += batch_size;
    }

    info!(set_id = %set, base = %base, differences = ranges.len(), "Built histogram");
    Ok(Histogram {
        set,
        base,
        witness_count: witnesses.len(),
        values: density(len, ranges, witnesses.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn overlapping_ranges_accumulate() {
        let values = density(
            6,
            [Range { start: 1, end: 4 }, Range { start: 3, end: 5 }],
            4,
        );
        assert_eq!(values, vec![0.0, 0.25, 0.25, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn gaps_contribute_nothing() {
        assert_eq!(density(3, [Range::point(1)], 2), vec![0.0; 3]);
    }

    #[test]
    fn out_of_range_spans_are_clipped() {
        let values = density(3, [Range { start: 2, end: 10 }], 1);
        assert_eq!(values, vec![0.0, 0.0, 1.0]);
    }

    proptest! {
        #[test]
        fn values_stay_in_unit_interval(
            len in 0_usize..64,
            spans in proptest::collection::vec((0_usize..80, 0_usize..20), 0..40),
            witnesses in 0_usize..5,
        ) {
            let ranges = spans
                .into_iter()
                .map(|(start, width)| Range { start, end: start + width });
            let values = density(len, ranges, witnesses);
            prop_assert_eq!(values.len(), len);
            prop_assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
