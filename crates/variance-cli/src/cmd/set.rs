use super::Workspace;
use crate::output::{self, OutputMode, pretty_section};
use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use variance_core::config::{CollatorConfig, Hyphenation};
use variance_core::model::ComparisonSet;

#[derive(Subcommand, Debug)]
pub enum SetCommand {
    /// Create a comparison set.
    Create(CreateArgs),
    /// List comparison sets.
    List,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Set name.
    pub name: String,

    /// Treat whitespace runs as significant.
    #[arg(long)]
    pub keep_whitespace: bool,

    /// Treat punctuation as significant.
    #[arg(long)]
    pub keep_punctuation: bool,

    /// Compare tokens case-sensitively.
    #[arg(long)]
    pub keep_case: bool,

    /// Rejoin hyphenated words: none, filter_linebreak or filter_all.
    #[arg(long, default_value = "filter_linebreak")]
    pub hyphenation: String,
}

impl CreateArgs {
    fn collator_config(&self) -> Result<CollatorConfig> {
        let hyphenation: Hyphenation = self
            .hyphenation
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid --hyphenation")?;
        Ok(CollatorConfig {
            filter_whitespace: !self.keep_whitespace,
            filter_punctuation: !self.keep_punctuation,
            filter_case: !self.keep_case,
            hyphenation,
        })
    }
}

pub fn run_set(command: &SetCommand, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    match command {
        SetCommand::Create(args) => run_create(args, workspace, mode),
        SetCommand::List => run_list(workspace, mode),
    }
}

fn run_create(args: &CreateArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let id = engine.create_set(&args.name, args.collator_config()?)?;
    let set = engine.store().set(id)?;
    output::render(mode, &set, |set, w| {
        writeln!(w, "Created set {} '{}'", set.id, set.name)
    })
}

#[derive(Debug, Serialize)]
struct SetList {
    sets: Vec<ComparisonSet>,
}

fn run_list(workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let engine = workspace.engine()?;
    let list = SetList {
        sets: engine.store().sets()?,
    };
    output::render(mode, &list, |list, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Sets ({})", list.sets.len()))?;
        }
        for set in &list.sets {
            writeln!(w, "{}\t{}\t{}", set.id, set.status, set.name)?;
        }
        Ok(())
    })
}
