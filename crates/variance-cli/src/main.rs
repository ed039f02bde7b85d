#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::Workspace;
use output::{CliError, OutputMode};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "vr: collate text witnesses and build a critical apparatus",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Database file (overrides `VARIANCE_DB`).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Create the database",
        after_help = "EXAMPLES:\n    vr init\n    vr init manuscripts.db"
    )]
    Init(cmd::init::InitArgs),

    #[command(subcommand, about = "Manage comparison sets")]
    Set(cmd::set::SetCommand),

    #[command(subcommand, about = "Manage witnesses")]
    Witness(cmd::witness::WitnessCommand),

    #[command(
        about = "Tokenize and collate every witness pair of a set",
        after_help = "EXAMPLES:\n    vr collate --set 1"
    )]
    Collate(cmd::collate::CollateArgs),

    #[command(
        about = "Render the critical apparatus against a base witness",
        after_help = "EXAMPLES:\n    vr apparatus --set 1 --base 1\n    vr apparatus --set 1 --base 1 --include 2,3"
    )]
    Apparatus(cmd::apparatus::ApparatusArgs),

    #[command(about = "Show difference density along a base witness")]
    Histogram(cmd::histogram::HistogramArgs),

    #[command(about = "Show the status of a set")]
    Status(cmd::status::StatusArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VARIANCE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "variance=debug,variance_core=debug,info"
        } else {
            "variance=info,variance_core=info,warn"
        })
    });

    let format = env::var("VARIANCE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let workspace = Workspace::resolve(env::current_dir()?, cli.db.clone());
    let mode = cli.output_mode();

    let command_result = match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &workspace, mode),
        Commands::Set(command) => cmd::set::run_set(command, &workspace, mode),
        Commands::Witness(command) => cmd::witness::run_witness(command, &workspace, mode),
        Commands::Collate(args) => cmd::collate::run_collate(args, &workspace, mode),
        Commands::Apparatus(args) => cmd::apparatus::run_apparatus(args, &workspace, mode),
        Commands::Histogram(args) => cmd::histogram::run_histogram(args, &workspace, mode),
        Commands::Status(args) => cmd::status::run_status(args, &workspace, mode),
    };

    if let Err(err) = command_result {
        output::render_error(mode, &CliError::from(&err))?;
        std::process::exit(1);
    }
    Ok(())
}
