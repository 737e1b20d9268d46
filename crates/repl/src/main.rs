//! Ell CLI
//!
//! `ell` with no arguments starts an interactive session; `ell <path>` runs
//! a script. Exit codes follow sysexits: 64 for bad usage, 65 for a compile
//! error, 70 for a runtime error, 74 when the file cannot be read.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use clap::error::ErrorKind;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use ell_runtime::{InterpretResult, Vm};

const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

#[derive(Parser)]
#[command(name = "ell")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ell interpreter - run a script or start a REPL", long_about = None)]
struct Cli {
    /// Script to run; starts an interactive session when omitted
    path: Option<PathBuf>,
}

fn main() {
    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if err.kind() == ErrorKind::DisplayHelp
                || err.kind() == ErrorKind::DisplayVersion =>
        {
            err.exit()
        }
        Err(_) => {
            eprintln!("Usage: ell [path]");
            process::exit(EX_USAGE);
        }
    };

    let code = match cli.path {
        Some(path) => run_file(&path),
        None => run_repl(),
    };
    process::exit(code);
}

fn run_file(path: &Path) -> i32 {
    let Ok(source) = std::fs::read_to_string(path) else {
        eprintln!("Could not open file {}.", path.display());
        return EX_IOERR;
    };

    debug!("running {}", path.display());
    let mut vm = Vm::new();
    match vm.interpret(&source) {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => EX_DATAERR,
        InterpretResult::RuntimeError => EX_SOFTWARE,
    }
}

fn run_repl() -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not start the session: {err}");
            return EX_SOFTWARE;
        }
    };

    let history = home::home_dir().map(|dir| dir.join(".ell_history"));
    if let Some(ref path) = history {
        let _ = editor.load_history(path);
    }

    debug!("starting interactive session");

    // One VM for the whole session; globals persist across lines.
    let mut vm = Vm::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(&line);
                }
                vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                eprintln!("Could not read line: {err}");
                break;
            }
        }
    }

    if let Some(ref path) = history {
        let _ = editor.save_history(path);
    }
    0
}
