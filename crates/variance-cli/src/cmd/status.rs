use super::Workspace;
use crate::output::{self, OutputMode, pretty_kv, pretty_section};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use variance_core::model::{
    AlignmentClass, AlignmentFilter, ComparisonSet, SetId, SetStatus, Witness,
};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long)]
    pub set: i64,
}

#[derive(Debug, Serialize)]
struct SetReport {
    #[serde(flatten)]
    set: ComparisonSet,
    witnesses: Vec<Witness>,
    differences: usize,
    transpositions: usize,
}

/// Execute `vr status`: lifecycle state, witnesses and alignment totals.
pub fn run_status(args: &StatusArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let id = SetId(args.set);
    let set = engine.store().set(id)?;
    let witnesses = engine.store().witnesses_of(id)?;
    let count = |class| -> Result<usize> {
        Ok(engine
            .store()
            .list_alignments(id, &AlignmentFilter::new(class))?
            .len())
    };
    let report = SetReport {
        differences: count(AlignmentClass::Differences)?,
        transpositions: count(AlignmentClass::Transpositions)?,
        set,
        witnesses,
    };

    output::render(mode, &report, |report, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Set {} '{}'", report.set.id, report.set.name))?;
            pretty_kv(w, "status", report.set.status.as_str())?;
            pretty_kv(w, "witnesses", report.witnesses.len().to_string())?;
            pretty_kv(w, "differences", report.differences.to_string())?;
            pretty_kv(w, "transposed", report.transpositions.to_string())?;
            if report.set.status == SetStatus::NotCollated && report.witnesses.len() >= 2 {
                writeln!(w)?;
                writeln!(w, "Run `vr collate --set {}` to compare the witnesses.", report.set.id)?;
            }
            Ok(())
        } else {
            writeln!(
                w,
                "{}\t{}\t{} witnesses\t{} differences\t{} transpositions",
                report.set.id,
                report.set.status,
                report.witnesses.len(),
                report.differences,
                report.transpositions
            )
        }
    })
}
