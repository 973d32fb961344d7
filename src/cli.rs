use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Organise camera media into a date-based folder hierarchy.
#[derive(Parser)]
#[command(
    name = "camelpack",
    version,
    long_version = crate::version::long_version(),
    about,
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Metadata extraction program to run.
    #[arg(long, global = true, env = "CAMELPACK_EXIFTOOL", default_value = "exiftool")]
    pub exiftool: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the embedded metadata of a file as JSON.
    Read(ReadArgs),
    /// Copy media into the destination hierarchy.
    Copy(TransferArgs),
    /// Move media into the destination hierarchy.
    Move(TransferArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// File to inspect.
    pub source: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// File or directory of media to transfer.
    pub source: PathBuf,

    /// Root of the destination hierarchy.
    pub destination: PathBuf,

    /// Print the planned transfers without touching the filesystem.
    #[arg(long)]
    pub dry_run: bool,

    /// Replace files that already exist at the destination.
    #[arg(long)]
    pub overwrite: bool,

    /// All-or-nothing: roll back completed files if any transfer fails.
    #[arg(long)]
    pub atomic: bool,

    /// Show a progress bar on stderr.
    #[arg(long)]
    pub progress: bool,

    /// Number of concurrent transfers (only 1 is supported).
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,
}
