//! CLI argument parsing and driver glue: `clap`-derive surface mirroring
//! the corpus convention (`Cli::parse()` in `main`).

use std::fs;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use clap::Parser as ClapParser;

use crate::container::Program;
use crate::disasm;
use crate::error::Error;
use crate::stats;
use crate::vm::VmOptions;

#[derive(Debug, ClapParser)]
#[command(name = "pvm", about = "Compile and run a small scripting-language subset on a stack VM")]
pub struct Cli {
    /// Source file (any extension) or a compiled `.pvm` container.
    pub path: PathBuf,

    /// Produce a `.pvm` file (the default action when `path` is source).
    #[arg(long)]
    pub compile: bool,

    /// Include debug info when compiling; enable per-instruction trace
    /// logging when executing.
    #[arg(long)]
    pub debug: bool,

    /// Disassemble instead of executing.
    #[arg(long = "show-bytecode")]
    pub show_bytecode: bool,

    /// Print header and table summaries instead of executing.
    #[arg(long)]
    pub info: bool,

    /// Print execution statistics after a run.
    #[arg(long)]
    pub performance: bool,

    /// Output path for `--compile` (defaults to `path` with `.pvm`).
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

pub fn run(cli: Cli) -> Result<(), Error> {
    init_tracing(cli.debug);

    let is_container = cli.path.extension().and_then(|e| e.to_str()) == Some("pvm");

    if is_container {
        let bytes = fs::read(&cli.path)?;
        let program = crate::load(&bytes)?;
        run_container(&cli, &program)
    } else {
        let source = fs::read_to_string(&cli.path)?;
        let program = crate::compile_source(&source, cli.debug)?;
        run_source(&cli, &program)
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { "trace" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pvm={level}")));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run_container(cli: &Cli, program: &Program) -> Result<(), Error> {
    if cli.show_bytecode {
        println!("{}", disasm::disassemble(program));
        return Ok(());
    }
    if cli.info {
        print_info(program);
        return Ok(());
    }
    execute_and_maybe_report(cli, program)
}

fn run_source(cli: &Cli, program: &Program) -> Result<(), Error> {
    if cli.show_bytecode {
        println!("{}", disasm::disassemble(program));
        return Ok(());
    }
    if cli.info {
        print_info(program);
        return Ok(());
    }
    if cli.compile || !cli.show_bytecode {
        let output_path = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.path));
        let bytes = crate::serialize(program);
        fs::write(&output_path, &bytes)?;
        println!(
            "wrote {} bytes to {}",
            bytes.len(),
            output_path.display()
        );
    }
    Ok(())
}

fn default_output_path(path: &Path) -> PathBuf {
    path.with_extension("pvm")
}

fn print_info(program: &Program) {
    println!("version: {:#06x}", program.version);
    println!("flags: {:#06x} (debug: {})", program.flags, program.has_debug());
    println!("constants: {}", program.constants.len());
    println!("symbols: {}", program.symbols.len());
    println!("code size: {} bytes", program.code.len());
    if let Some(debug) = &program.debug {
        println!("debug entries: {}", debug.len());
    }
}

fn execute_and_maybe_report(cli: &Cli, program: &Program) -> Result<(), Error> {
    let stdin = BufReader::new(io::stdin());
    let stdout = io::stdout();
    let options = VmOptions {
        trace: cli.debug,
        ..VmOptions::default()
    };

    if cli.performance {
        let (result, execution_stats) = stats::run_with_stats(program, stdin, stdout.lock(), options);
        result?;
        let mut stderr = io::stderr();
        writeln!(stderr, "{}", execution_stats.report()).ok();
        Ok(())
    } else {
        crate::execute(program, stdin, stdout.lock(), options)?;
        Ok(())
    }
}
