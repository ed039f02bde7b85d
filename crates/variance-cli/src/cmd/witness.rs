use super::{Workspace, parse_range, parse_span, read_text};
use crate::output::{self, OutputMode, pretty_section};
use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use variance_core::model::{Range, SetId, Witness, WitnessId};

#[derive(Subcommand, Debug)]
pub enum WitnessCommand {
    /// Add a witness read from a UTF-8 text file.
    Add(AddArgs),
    /// List the witnesses of a set.
    List(ListArgs),
    /// Remove a witness and everything anchored on it.
    Rm(RmArgs),
    /// Record a transposition between spans of two witnesses.
    Transpose(TransposeArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[arg(long)]
    pub set: i64,

    /// Display name; defaults to the file stem.
    #[arg(long)]
    pub name: Option<String>,

    /// Apparatus label; defaults to the name.
    #[arg(long)]
    pub siglum: Option<String>,

    /// Collate only this part of the text, as START..END character offsets.
    #[arg(long)]
    pub fragment: Option<String>,

    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub set: i64,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    #[arg(long)]
    pub set: i64,

    pub witness: i64,
}

#[derive(Args, Debug)]
pub struct TransposeArgs {
    #[arg(long)]
    pub set: i64,

    /// First span, as WITNESS:START..END.
    pub from: String,

    /// Second span, as WITNESS:START..END.
    pub to: String,
}

pub fn run_witness(command: &WitnessCommand, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    match command {
        WitnessCommand::Add(args) => run_add(args, workspace, mode),
        WitnessCommand::List(args) => run_list(args, workspace, mode),
        WitnessCommand::Rm(args) => run_rm(args, workspace, mode),
        WitnessCommand::Transpose(args) => run_transpose(args, workspace, mode),
    }
}

fn run_add(args: &AddArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let text = read_text(&args.file)?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => args
            .file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_owned)
            .with_context(|| format!("cannot derive a name from {}", args.file.display()))?,
    };
    let siglum = args.siglum.clone().unwrap_or_else(|| name.clone());
    let fragment = args.fragment.as_deref().map(parse_range).transpose()?;

    let engine = workspace.engine()?;
    let set = SetId(args.set);
    let id = engine.add_witness(set, &name, &siglum, &text, fragment)?;
    let witness = Witness {
        id,
        name,
        siglum,
        fragment,
    };
    output::render(mode, &witness, |witness, w| {
        writeln!(
            w,
            "Added witness {} '{}' ({}) to set {set}",
            witness.id, witness.name, witness.siglum
        )
    })
}

#[derive(Debug, Serialize)]
struct WitnessList {
    set: SetId,
    witnesses: Vec<Witness>,
}

fn run_list(args: &ListArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let set = SetId(args.set);
    let list = WitnessList {
        set,
        witnesses: engine.store().witnesses_of(set)?,
    };
    output::render(mode, &list, |list, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Witnesses of set {}", list.set))?;
        }
        for witness in &list.witnesses {
            let fragment = witness
                .fragment
                .map_or_else(String::new, |range: Range| format!("\t{range}"));
            writeln!(w, "{}\t{}\t{}{fragment}", witness.id, witness.siglum, witness.name)?;
        }
        Ok(())
    })
}

#[derive(Debug, Serialize)]
struct Removed {
    set: SetId,
    witness: WitnessId,
}

fn run_rm(args: &RmArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let removed = Removed {
        set: SetId(args.set),
        witness: WitnessId(args.witness),
    };
    engine.remove_witness(removed.set, removed.witness)?;
    output::render(mode, &removed, |removed, w| {
        writeln!(w, "Removed witness {} from set {}", removed.witness, removed.set)
    })
}

#[derive(Debug, Serialize)]
struct Transposition {
    set: SetId,
    spans: [(WitnessId, Range); 2],
}

fn run_transpose(args: &TransposeArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let from = parse_span(&args.from)?;
    let to = parse_span(&args.to)?;
    let engine = workspace.engine()?;
    let set = SetId(args.set);
    engine.add_transposition(set, from, to)?;
    let recorded = Transposition {
        set,
        spans: [from, to],
    };
    output::render(mode, &recorded, |t, w| {
        let [(a, ar), (b, br)] = t.spans;
        writeln!(w, "Recorded transposition {a}{ar} <-> {b}{br} in set {}", t.set)
    })
}
