use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspection CLI for the hulk activity log
#[derive(Parser, Debug)]
#[command(name = "hulk", version, about = "hulk activity log tools")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Print the effective configuration (defaults + HULK_* env)
    Config {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the generation files of one activity shard
    Files {
        /// Log directory (default: HULK_LOG_DIR or ./hulk-log)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Activity id as "<group>_<branch>"
        #[arg(long)]
        activity: String,
        /// File prefix (default: HULK_LOG_PREFIX or hulk_tx)
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Decode the snapshot blocks of one log file
    Dump {
        #[arg(long)]
        file: PathBuf,
        /// Blocks are HKSN frames around JSON
        #[arg(long, default_value_t = false)]
        framed: bool,
        /// Print one JSON context per line instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
