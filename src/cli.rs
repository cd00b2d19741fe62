use clap::Parser;
use std::path::PathBuf;

/// feedbackd — a daemon to trigger event feedback
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Print debug information during command processing
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Replace a running instance
    #[arg(short = 'r', long = "replace")]
    pub replace: bool,

    /// Settings file path (default: standard locations)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,
}
