use super::Workspace;
use crate::output::{self, OutputMode, pretty_kv, pretty_section};
use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;
use variance_core::model::SetId;
use variance_core::task::TaskStatus;

#[derive(Args, Debug)]
pub struct CollateArgs {
    #[arg(long)]
    pub set: i64,
}

/// Execute `vr collate`: tokenize every witness, then compare every pair.
pub fn run_collate(args: &CollateArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let set = SetId(args.set);
    let status = TaskStatus::new();
    let report = engine
        .collate(set, &status)
        .with_context(|| format!("Failed to collate set {set}"))?;
    info!(set_id = %set, alignments = report.summary.alignments, "Collation finished");

    output::render(mode, &report, |report, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Collated set {set}"))?;
            for witness in &report.witnesses {
                pretty_kv(
                    w,
                    &format!("witness {}", witness.witness),
                    format!("{} tokens, {} chars", witness.tokens, witness.tokenized_len),
                )?;
            }
            pretty_kv(w, "pairs", report.summary.pairs.to_string())?;
            pretty_kv(w, "alignments", report.summary.alignments.to_string())?;
            pretty_kv(w, "transposed", report.summary.transpositions.to_string())
        } else {
            writeln!(
                w,
                "collated set {set}: {} pairs, {} alignments, {} transpositions",
                report.summary.pairs, report.summary.alignments, report.summary.transpositions
            )
        }
    })
}
