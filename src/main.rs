// Version information constants
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::error::Error;
use std::io::{BufWriter, Write};

use clap::{Parser, Subcommand};

mod dendrogram;
mod divergence;
mod error;
mod matrix;
mod progress;
mod signature;
mod store;
mod tree;

/// Logger manager supporting detailed logging with timestamps
pub struct Logger {
    writer: BufWriter<std::fs::File>,
}

impl Logger {
    pub fn new(file: std::fs::File) -> Self {
        Self {
            writer: BufWriter::new(file),
        }
    }

    /// Record detailed log information
    pub fn log(&mut self, message: &str) -> std::io::Result<()> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(self.writer, "[{}] {}", timestamp, message)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build per-sample distance matrices and neighbor-joining trees for one
    /// omics layer
    Dendrogram(dendrogram::DendrogramArgs),
    /// Decompose tree length into divergence and diversity across omics
    /// layers and compare DNA/RNA topologies
    Divergence(divergence::DivergenceArgs),
    /// Score gene-signature composites on a z-score matrix
    Signature(signature::SignatureArgs),
}

fn open_logger(log: &Option<String>, default_name: &str) -> Result<Logger, Box<dyn Error>> {
    let log_file = if let Some(log_path) = log {
        std::fs::File::create(log_path)?
    } else {
        std::fs::File::create(default_name)?
    };
    Ok(Logger::new(log_file))
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Dendrogram(args) => {
            let mut logger = open_logger(&args.log, "dendrogram.log")?;
            dendrogram::run_dendrogram(&args, &mut logger)
        }
        Commands::Divergence(args) => {
            let mut logger = open_logger(&args.log, "divergence.log")?;
            divergence::run_divergence(&args, &mut logger)
        }
        Commands::Signature(args) => {
            let mut logger = open_logger(&args.log, "signature.log")?;
            signature::score_signatures(&args, &mut logger)
        }
    }
}
