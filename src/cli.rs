use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;
use tracing::info;

use crate::core::{AnalyzeRequest, Engine};

#[derive(Parser)]
#[command(name = "dfd-atlas")]
#[command(about = "Leveled data-flow diagrams extracted from source code")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the graph and render diagrams
    Analyze {
        /// Source root to analyze (defaults to project.source_dir)
        source: Option<PathBuf>,

        /// Output directory for graph.json and diagrams
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Level to render: context, groups or detail:<groupId> (repeatable; default all)
        #[arg(short, long = "level")]
        levels: Vec<String>,

        /// TOML file mapping group names to path prefixes
        #[arg(short, long)]
        groups: Option<PathBuf>,

        /// Source file extension to scan (repeatable; overrides configuration)
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Abort scanning after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Print diagrams instead of writing files
        #[arg(long)]
        stdout: bool,

        /// Fail if any diagnostics were recorded (useful for CI)
        #[arg(long)]
        strict: bool,
    },

    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// List the classification rules in priority order
    Rules,
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Analyze { source, output, levels, groups, extensions, deadline, stdout, strict } => {
                let report = engine.analyze(AnalyzeRequest {
                    source,
                    output,
                    levels,
                    groups_file: groups,
                    extensions,
                    deadline_secs: deadline,
                    stdout,
                    strict,
                }).await?;

                let stats = &report.outcome.stats;
                info!(
                    "Scanned {} units, classified {}, {} diagnostics",
                    stats.units_scanned,
                    stats.units_classified,
                    report.outcome.diagnostics.len()
                );
                if let Some(dir) = &report.output_dir {
                    info!("📁 {} diagrams in {} (run fingerprint {})", report.diagrams.len(), dir.display(), report.fingerprint);
                }
                Ok(())
            }
            Commands::Init { path, force } => {
                engine.init(path, force).await
            }
            Commands::Rules => {
                engine.rules().await
            }
        }
    }
}
