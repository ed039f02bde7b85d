use super::Workspace;
use crate::output::{self, OutputMode, pretty_kv, pretty_section};
use anyhow::{Context as _, Result};
use clap::Args;
use variance_core::model::{SetId, WitnessId};
use variance_core::task::TaskStatus;

#[derive(Args, Debug)]
pub struct ApparatusArgs {
    #[arg(long)]
    pub set: i64,

    /// Witness the apparatus is keyed to.
    #[arg(long)]
    pub base: i64,

    /// Witnesses to report against the base; all when omitted.
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<i64>,
}

/// Execute `vr apparatus`: one row per variant location in the base text.
pub fn run_apparatus(args: &ApparatusArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let set = SetId(args.set);
    let base = WitnessId(args.base);
    let include: Vec<WitnessId> = args.include.iter().copied().map(WitnessId).collect();

    let apparatus = engine
        .apparatus(set, base, &include, &TaskStatus::new())
        .with_context(|| format!("Failed to build apparatus for set {set}"))?;

    output::render(mode, &apparatus, |apparatus, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Apparatus of set {}", apparatus.set))?;
            pretty_kv(
                w,
                "base",
                format!("{} ({})", apparatus.base.siglum, apparatus.base.name),
            )?;
            let sigla: Vec<&str> = apparatus.witnesses.iter().map(|l| l.siglum.as_str()).collect();
            pretty_kv(w, "witnesses", sigla.join(", "))?;
            writeln!(w)?;
        }
        for row in &apparatus.rows {
            writeln!(w, "{row}")?;
        }
        Ok(())
    })
}
