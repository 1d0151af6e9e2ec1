//! CLI interface for the OODA agent
//!
//! One flat command: start a benchmark session, run the selected tasks and
//! submit. Global flags mirror the config file for one-off overrides.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// OODA benchmark agent
///
/// Runs every task of a benchmark session through the Observe-Orient-Decide-Act
/// loop and submits the session when done.
#[derive(Parser, Debug)]
#[command(name = "ooda")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Benchmark tier to start a session on
    #[arg(short, long, value_enum, default_value_t = Benchmark::Dev)]
    pub benchmark: Benchmark,

    /// Run only these tasks (1-based index, task id or spec id; repeatable)
    #[arg(short = 't', long = "task", value_name = "SEL")]
    pub tasks: Vec<String>,

    /// Model id or alias from the allow-list
    #[arg(short, long)]
    pub model: Option<String>,

    /// Parallel workers (default from config)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Force sequential execution
    #[arg(long)]
    pub sequential: bool,

    /// Output the session summary in JSON format
    #[arg(long)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Benchmark tiers offered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Benchmark {
    Dev,
    Test,
    Prod,
}

impl Benchmark {
    /// Platform benchmark name, e.g. `erc3-dev`
    pub fn platform_name(&self) -> &'static str {
        match self {
            Benchmark::Dev => "erc3-dev",
            Benchmark::Test => "erc3-test",
            Benchmark::Prod => "erc3-prod",
        }
    }
}
