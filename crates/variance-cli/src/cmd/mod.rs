pub mod apparatus;
pub mod collate;
pub mod histogram;
pub mod init;
pub mod set;
pub mod status;
pub mod witness;

use anyhow::{Context as _, Result, bail};
use std::path::{Path, PathBuf};
use variance_core::Engine;
use variance_core::config::resolve_config;
use variance_core::db::open_store;
use variance_core::model::{Range, WitnessId};

/// Project directory holding the database and `config.toml`.
pub const PROJECT_DIR: &str = ".variance";
pub const DEFAULT_DB: &str = "variance.db";

/// Where the command runs and which database it talks to.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub project_root: PathBuf,
    pub db: PathBuf,
}

impl Workspace {
    /// `--db`, else `VARIANCE_DB`, else `.variance/variance.db` under the
    /// project root.
    pub fn resolve(project_root: PathBuf, db_flag: Option<PathBuf>) -> Self {
        let db = db_flag
            .or_else(|| std::env::var_os("VARIANCE_DB").map(PathBuf::from))
            .unwrap_or_else(|| project_root.join(PROJECT_DIR).join(DEFAULT_DB));
        let db = if db.is_relative() {
            project_root.join(db)
        } else {
            db
        };
        Self { project_root, db }
    }

    /// Open the engine over an existing database.
    pub fn engine(&self) -> Result<Engine> {
        if !self.db.exists() {
            bail!(
                "no database at {}. Run `vr init` first.",
                self.db.display()
            );
        }
        self.open()
    }

    pub(crate) fn open(&self) -> Result<Engine> {
        let config = resolve_config(&self.project_root).context("Failed to load configuration")?;
        let store = open_store(&self.db)
            .with_context(|| format!("Failed to open database {}", self.db.display()))?;
        Ok(Engine::new(store, config))
    }
}

/// Parse `start..end` (character offsets).
pub fn parse_range(raw: &str) -> Result<Range> {
    let (start, end) = raw
        .split_once("..")
        .with_context(|| format!("expected START..END, got '{raw}'"))?;
    let start: usize = start
        .trim()
        .parse()
        .with_context(|| format!("invalid range start in '{raw}'"))?;
    let end: usize = end
        .trim()
        .parse()
        .with_context(|| format!("invalid range end in '{raw}'"))?;
    Range::new(start, end).with_context(|| format!("range start exceeds end in '{raw}'"))
}

/// Parse `WITNESS:START..END`.
pub fn parse_span(raw: &str) -> Result<(WitnessId, Range)> {
    let (witness, range) = raw
        .split_once(':')
        .with_context(|| format!("expected WITNESS:START..END, got '{raw}'"))?;
    let witness: i64 = witness
        .trim()
        .parse()
        .with_context(|| format!("invalid witness id in '{raw}'"))?;
    Ok((WitnessId(witness), parse_range(range)?))
}

/// Read a witness source file.
pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parses_offsets() {
        assert_eq!(parse_range("3..9").ok(), Some(Range { start: 3, end: 9 }));
        assert_eq!(parse_range(" 0 .. 0 ").ok(), Some(Range::point(0)));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(parse_range("9..3").is_err());
        assert!(parse_range("9-3").is_err());
    }

    #[test]
    fn span_parses_witness_and_range() {
        let (witness, range) = parse_span("2:4..7").expect("span");
        assert_eq!(witness, WitnessId(2));
        assert_eq!(range, Range { start: 4, end: 7 });
        assert!(parse_span("x:4..7").is_err());
    }

    #[test]
    fn relative_db_resolves_under_project_root() {
        let ws = Workspace::resolve(PathBuf::from("/work"), Some(PathBuf::from("a.db")));
        assert_eq!(ws.db, PathBuf::from("/work/a.db"));
    }
}
