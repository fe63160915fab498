use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "propcheck", version, about = "Property validation pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a findings bundle through the full pipeline
    Run {
        /// Path to the findings bundle (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Session identifier (defaults to a fresh UUID)
        #[arg(short, long)]
        session: Option<String>,

        /// Wave-internal concurrency limit
        #[arg(long)]
        concurrency: Option<usize>,

        /// Path to config file (overrides default search)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Look up one age/score pair in the decision matrix
    Matrix {
        /// Effective building age in years
        #[arg(long)]
        age: u32,

        /// Condition score (0-30)
        #[arg(long)]
        score: u32,
    },
}
