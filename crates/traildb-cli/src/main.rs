// crates/traildb-cli/src/main.rs

use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser)]
#[command(name = "tdb")]
#[command(about = "TrailDB command line tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a tdb from delimited text or JSON lines
    Make(cmd::make::MakeArgs),

    /// Dump a tdb as CSV or JSON lines
    Dump(cmd::dump::DumpArgs),

    /// Summarize a tdb (counts, time range, field cardinalities)
    Inspect(cmd::inspect::InspectArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Make(args) => cmd::make::run(args),
        Commands::Dump(args) => cmd::dump::run(args),
        Commands::Inspect(args) => cmd::inspect::run(args),
    }
}
