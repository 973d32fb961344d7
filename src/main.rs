//! `camelpack` - date-based media organiser.

use clap::Parser;
use std::io::Write;
use tracing::level_filters::LevelFilter;

use camelpack::cli::{Cli, Command};
use camelpack::engine::{self, Services};
use camelpack::exit_codes::{self, exit};
use camelpack::fsops::LocalFiles;
use camelpack::metadata::ExifTool;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let files = LocalFiles::new();
    let exiftool = ExifTool::new(cli.exiftool.clone());
    let services = Services {
        files: &files,
        metadata: &exiftool,
    };

    let mut stdout = std::io::stdout().lock();
    let result = match &cli.command {
        Command::Read(args) => engine::read(args, services, &mut stdout),
        Command::Copy(args) => engine::copy(args, services, &mut stdout),
        Command::Move(args) => engine::move_files(args, services, &mut stdout),
    };

    let _ = stdout.flush();
    drop(stdout);

    let code = match result {
        Ok(()) => exit::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
