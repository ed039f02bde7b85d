use super::{PROJECT_DIR, Workspace};
use crate::output::{self, OutputMode};
use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use variance_core::config::EngineConfig;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Database file to create (defaults to `--db` or `.variance/variance.db`).
    pub db: Option<PathBuf>,

    /// Recreate the database even if it already exists.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitReport {
    db: PathBuf,
    config: Option<PathBuf>,
}

/// Execute `vr init`. Creates the database with the current schema and, if
/// absent, a `.variance/config.toml` holding the default engine settings.
pub fn run_init(args: &InitArgs, workspace: &Workspace, mode: OutputMode) -> Result<()> {
    let workspace = match &args.db {
        Some(db) => Workspace::resolve(workspace.project_root.clone(), Some(db.clone())),
        None => workspace.clone(),
    };

    if workspace.db.exists() {
        if !args.force {
            bail!(
                "{} already exists. Use `vr init --force` to recreate it.",
                workspace.db.display()
            );
        }
        std::fs::remove_file(&workspace.db)
            .with_context(|| format!("Failed to remove {}", workspace.db.display()))?;
    }

    workspace.open()?;

    let config_path = workspace.project_root.join(PROJECT_DIR).join("config.toml");
    let config = if config_path.exists() {
        None
    } else {
        let body = toml::to_string_pretty(&EngineConfig::default())
            .context("Failed to serialize default config")?;
        std::fs::create_dir_all(workspace.project_root.join(PROJECT_DIR))
            .context("Failed to create .variance directory")?;
        std::fs::write(&config_path, body)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        Some(config_path)
    };

    let report = InitReport {
        db: workspace.db,
        config,
    };
    output::render(mode, &report, |report, w| {
        writeln!(w, "Initialized {}", report.db.display())?;
        if let Some(config) = &report.config {
            writeln!(w, "Config: {}", config.display())?;
        }
        if mode.is_pretty() {
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  vr set create <name>")?;
            writeln!(w, "  vr witness add --set <id> --name <name> <file>")?;
            writeln!(w, "  vr collate --set <id>")?;
        }
        Ok(())
    })
}
