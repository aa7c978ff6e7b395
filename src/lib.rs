//! A small scripting-language toolchain: source compiles to a
//! versioned binary bytecode container and executes on a stack virtual
//! machine. This crate root exposes the whole pipeline so integration
//! tests (and the `pvm` binary) can drive it without shelling out.

pub mod ast;
pub mod chunk;
pub mod cli;
pub mod codegen;
pub mod container;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod opcode;
pub mod parser;
pub mod pool;
pub mod stats;
pub mod symtab;
pub mod token;
pub mod value;
pub mod vm;

use error::{CompileError, Error};

/// Lexes, parses, and generates bytecode for `source`, in one call.
pub fn compile_source(source: &str, debug: bool) -> Result<container::Program, CompileError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    let ast = parser::Parser::new(tokens).parse()?;
    codegen::Codegen::compile(&ast, debug)
}

/// Serializes a compiled `Program` to bytes.
pub fn serialize(program: &container::Program) -> Vec<u8> {
    let mut bytes = Vec::new();
    container::write(program, &mut bytes).expect("writing to a Vec<u8> never fails");
    bytes
}

/// Loads and verifies a `Program` from `.pvm` bytes.
pub fn load(bytes: &[u8]) -> Result<container::Program, error::LoadError> {
    container::read(&mut std::io::Cursor::new(bytes))
}

/// Runs a loaded program to completion against the given stdin/stdout.
pub fn execute<R: std::io::BufRead, W: std::io::Write>(
    program: &container::Program,
    stdin: R,
    stdout: W,
    options: vm::VmOptions,
) -> Result<(), error::RuntimeError> {
    vm::Vm::new(program, stdin, stdout, options).run()
}

/// Compiles and immediately executes `source`, the shape used by
/// scenario-style integration tests that don't care about the
/// intermediate `.pvm` bytes.
pub fn compile_and_run<R: std::io::BufRead, W: std::io::Write>(
    source: &str,
    debug: bool,
    stdin: R,
    stdout: W,
    options: vm::VmOptions,
) -> Result<(), Error> {
    let program = compile_source(source, debug)?;
    execute(&program, stdin, stdout, options)?;
    Ok(())
}
