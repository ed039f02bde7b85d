//! Critical apparatus: variant units relative to one base witness.
//!
//! Alignments anchored at the base are grouped into [`VariantUnit`]s keyed by
//! base range, merged, sorted into document order and rendered into
//! [`ApparatusRow`]s.

mod render;

pub use render::{ApparatusRow, LineIndex, Reading, normalize_text};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{CollationError, StoreError};
use crate::model::{
    Alignment, AlignmentClass, AlignmentFilter, Range, SetId, SetStatus, Witness, WitnessId,
};
use crate::store::Store;
use crate::task::TaskStatus;

/// One apparatus entry before rendering: a base range, the alignment groups
/// that produced it and each differing witness's (expanded) range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantUnit {
    pub range: Range,
    pub groups: BTreeSet<u32>,
    pub witnesses: BTreeMap<WitnessId, Range>,
}

impl VariantUnit {
    #[must_use]
    pub fn new(range: Range, group: u32) -> Self {
        Self {
            range,
            groups: BTreeSet::from([group]),
            witnesses: BTreeMap::new(),
        }
    }

    /// Record `range` for `witness`, widening any range already recorded.
    pub fn add_witness(&mut self, witness: WitnessId, range: Range, group: u32) {
        self.groups.insert(group);
        self.witnesses
            .entry(witness)
            .and_modify(|existing| *existing = existing.span(&range))
            .or_insert(range);
    }

    /// Adjacent units merge when they came from the same groups and the same
    /// witnesses. Group 0 means no clustering is known and never merges.
    #[must_use]
    pub fn can_merge_with(&self, other: &Self) -> bool {
        !self.groups.contains(&0)
            && !other.groups.contains(&0)
            && self.groups == other.groups
            && self.witnesses.keys().eq(other.witnesses.keys())
    }

    /// Absorb `other`: ranges widen to cover both, groups union.
    pub fn merge(&mut self, other: Self) {
        self.range = self.range.span(&other.range);
        self.groups.extend(other.groups);
        for (witness, range) in other.witnesses {
            self.witnesses
                .entry(witness)
                .and_modify(|existing| *existing = existing.span(&range))
                .or_insert(range);
        }
    }
}

/// Find the unit for `range`, scanning in order and stopping once units
/// start past the range's end. A unit missed this way has an exact twin that
/// the final sort folds back in.
fn unit_for(units: &mut Vec<VariantUnit>, range: Range, group: u32) -> &mut VariantUnit {
    let found = units
        .iter()
        .take_while(|unit| unit.range.start <= range.end)
        .position(|unit| unit.range == range);
    let index = found.unwrap_or_else(|| {
        units.push(VariantUnit::new(range, group));
        units.len() - 1
    });
    &mut units[index]
}

/// Merge each unit into its surviving predecessor when eligible.
#[must_use]
pub fn merge_adjacent(units: Vec<VariantUnit>) -> Vec<VariantUnit> {
    let mut merged: Vec<VariantUnit> = Vec::with_capacity(units.len());
    for unit in units {
        match merged.last_mut() {
            Some(prior) if unit.can_merge_with(prior) => prior.merge(unit),
            _ => merged.push(unit),
        }
    }
    merged
}

/// Sort by base range (start, then end) and fold units with identical base
/// ranges together.
#[must_use]
pub fn sort_and_merge_equal(mut units: Vec<VariantUnit>) -> Vec<VariantUnit> {
    units.sort_by_key(|unit| (unit.range.start, unit.range.end));
    let mut merged: Vec<VariantUnit> = Vec::with_capacity(units.len());
    for unit in units {
        match merged.last_mut() {
            Some(prior) if prior.range == unit.range => prior.merge(unit),
            _ => merged.push(unit),
        }
    }
    merged
}

/// Group one batch of alignments into `units`.
fn absorb(
    units: &mut Vec<VariantUnit>,
    base: WitnessId,
    batch: &[Alignment],
) -> Result<(), CollationError> {
    for alignment in batch {
        let (Some(base_side), Some(other)) =
            (alignment.annotation_for(base), alignment.other_than(base))
        else {
            error!(alignment_id = %alignment.id, base = %base, "Alignment has no side on the base witness");
            return Err(CollationError::InconsistentMergeState(format!(
                "alignment {} does not pair base witness {base} with another witness",
                alignment.id
            )));
        };
        unit_for(units, base_side.range, alignment.group).add_witness(
            other.witness,
            other.range,
            alignment.group,
        );
    }
    Ok(())
}

/// Read every difference and transposition anchored at `base`, in pages, and
/// build the ordered list of variant units.
pub fn collect_units<S: Store + ?Sized>(
    store: &S,
    set: SetId,
    base: WitnessId,
    excluded: &[WitnessId],
    batch_size: usize,
    status: &TaskStatus,
) -> Result<Vec<VariantUnit>, CollationError> {
    let batch_size = batch_size.max(1);
    let mut units = Vec::new();

    for class in [AlignmentClass::Differences, AlignmentClass::Transpositions] {
        let mut offset = 0;
        loop {
            status.check_cancelled()?;
            let filter = AlignmentFilter::new(class)
                .with_base(base)
                .excluding(excluded.iter().copied())
                .with_page(offset, batch_size);
            let batch = store.list_alignments(set, &filter)?;
            debug!(set_id = %set, class = ?class, offset, count = batch.len(), "Fetched alignment batch");

            absorb(&mut units, base, &batch)?;
            units = merge_adjacent(units);

            if batch.len() < batch_size {
                break;
            }
            offset += batch_size;
        }
    }

    Ok(sort_and_merge_equal(units))
}

/// Identity of a witness as shown in an apparatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessLabel {
    pub id: WitnessId,
    pub name: String,
    pub siglum: String,
}

impl From<&Witness> for WitnessLabel {
    fn from(witness: &Witness) -> Self {
        Self {
            id: witness.id,
            name: witness.name.clone(),
            siglum: witness.siglum.clone(),
        }
    }
}

/// A rendered critical apparatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apparatus {
    pub set: SetId,
    pub base: WitnessLabel,
    /// Included witnesses other than the base, in id order.
    pub witnesses: Vec<WitnessLabel>,
    pub rows: Vec<ApparatusRow>,
}

/// Builds the apparatus of a collated set relative to a base witness.
pub struct ApparatusBuilder<'a, S: Store + ?Sized> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: Store + ?Sized> ApparatusBuilder<'a, S> {
    pub const fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Build the apparatus for `base`. An empty `include` means every witness
    /// in the set.
    pub fn build(
        &self,
        set: SetId,
        base: WitnessId,
        include: &[WitnessId],
        status: &TaskStatus,
    ) -> Result<Apparatus, CollationError> {
        let current = self.store.set(set)?.status;
        if current != SetStatus::Collated {
            return Err(StoreError::StatusConflict {
                set,
                actual: current,
                expected: vec![SetStatus::Collated],
            }
            .into());
        }

        let witnesses = self.store.witnesses_of(set)?;
        let base_witness = witnesses
            .iter()
            .find(|w| w.id == base)
            .ok_or(CollationError::Store(StoreError::WitnessNotFound(base)))?;
        if let Some(unknown) = include.iter().find(|id| !witnesses.iter().any(|w| w.id == **id)) {
            return Err(CollationError::Store(StoreError::WitnessNotFound(*unknown)));
        }

        let included: Vec<&Witness> = witnesses
            .iter()
            .filter(|w| w.id != base && (include.is_empty() || include.contains(&w.id)))
            .collect();
        let excluded: Vec<WitnessId> = witnesses
            .iter()
            .filter(|w| w.id != base && !included.iter().any(|i| i.id == w.id))
            .map(|w| w.id)
            .collect();

        status.set_note("Gathering variants");
        let units = collect_units(
            self.store,
            set,
            base,
            &excluded,
            self.config.apparatus_batch_size,
            status,
        )?;
        info!(set_id = %set, base = %base, units = units.len(), "Collected variant units");

        status.set_note("Rendering apparatus");
        let segment = status.add_segment(1, units.len());
        let renderer = render::Renderer::new(
            self.store,
            base_witness,
            &included,
            self.config.context_window,
        )?;
        let rows = renderer.render(&units, || {
            status.advance(segment);
            status.check_cancelled()
        })?;

        Ok(Apparatus {
            set,
            base: base_witness.into(),
            witnesses: included.into_iter().map(WitnessLabel::from).collect(),
            rows,
        })
    }
}
