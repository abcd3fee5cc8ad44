//! the one-shot interpreter. takes one or more source paths and runs each in
//! turn; with no arguments, prints usage and exits zero.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use rill::pipeline;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// source files to run, in order
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.files.is_empty() {
        let _ = Args::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }

    let mut stdout = io::stdout();
    for file in &args.files {
        tracing::debug!(path = %file.display(), "running source file");
        if let Err(e) = pipeline::run_file(file, &mut stdout) {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
