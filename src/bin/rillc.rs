//! the compiler driver. takes a source file and an optional output format
//! (a serialized binary container by default).
//!
//! run with `--help` for more info.

use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use rill::front;
use rill::{bytecode, compiler};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Binary)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// disassembled bytecode
    Bytecode,
    /// the serialized binary container
    Binary,
}

fn main() -> ExitCode {
    use Output::*;
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {e}", args.file);
            return ExitCode::FAILURE;
        }
    };

    match args.out {
        Tokens => match front::lex::lex_all(&source) {
            Ok(tokens) => {
                for token in tokens {
                    println!("{:?} {:?} {}:{}", token.kind, token.text, token.span.line, token.span.col);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Ast => match front::parse(&args.file, &source) {
            Ok(program) => {
                println!("{program:#?}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Bytecode => match compile(&args.file, &source) {
            Ok(binary) => {
                println!("{}", bytecode::disassemble(&binary.code));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Binary => match compile(&args.file, &source) {
            Ok(binary) => match binary.to_bytes() {
                Ok(bytes) => {
                    print!("{}", String::from_utf8_lossy(&bytes));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            },
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
    }
}

fn compile(file: &str, source: &str) -> rill::error::Result<rill::binary::Binary> {
    let program = front::parse(file, source)?;
    compiler::compile(&program, file, source)
}
