//! The `tang` command-line tool.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tang_engine::{Program, ProgramFlags};

#[derive(Parser)]
#[command(name = "tang", about = "Run Tang scripts and templates", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script (or template) and print its output.
    Run {
        /// Source file; `-` reads from stdin.
        file: PathBuf,
        /// Treat the source as a template with `<% … %>` islands.
        #[arg(long)]
        template: bool,
        /// Dump the AST and bytecode to stderr.
        #[arg(long)]
        debug: bool,
        /// Skip the native generator and interpret bytecode.
        #[arg(long)]
        no_native: bool,
    },
    /// Compile a script and print its bytecode disassembly.
    Dump {
        /// Source file; `-` reads from stdin.
        file: PathBuf,
        /// Treat the source as a template.
        #[arg(long)]
        template: bool,
        /// Print the AST instead of the bytecode.
        #[arg(long)]
        ast: bool,
    },
}

fn read_source(file: &PathBuf) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("reading stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            file,
            template,
            debug,
            no_native,
        } => {
            let source = read_source(&file)?;
            let mut flags = ProgramFlags::from_env();
            if template {
                flags |= ProgramFlags::IS_TEMPLATE;
            }
            if debug {
                flags |= ProgramFlags::DEBUG;
            }
            if no_native {
                flags |= ProgramFlags::DISABLE_NATIVE;
            }
            let program = Program::with_flags(&source, flags)
                .with_context(|| format!("compiling {}", file.display()))?;
            let mut context = program.create_context();
            if !program.execute(&mut context) {
                anyhow::bail!("execution failed");
            }
            print!("{}", context.render_output());
            if context.result_is_error() {
                eprintln!("{}", context.result_display());
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Dump {
            file,
            template,
            ast,
        } => {
            let source = read_source(&file)?;
            let mut flags = ProgramFlags::from_env() | ProgramFlags::DISABLE_NATIVE;
            if template {
                flags |= ProgramFlags::IS_TEMPLATE;
            }
            let program = Program::with_flags(&source, flags)
                .with_context(|| format!("compiling {}", file.display()))?;
            if ast {
                print!("{}", program.ast().dump());
            } else if let Some(bytecode) = program.bytecode() {
                print!("{bytecode}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
