//! Typed error taxonomy for every stage of the pipeline: compile, load,
//! and run. Each stage gets its own `thiserror`-derived enum so the CLI
//! boundary can map a failure to the right exit code without downcasting.

use thiserror::Error;

/// A compile-time diagnostic, carrying the source position when the
/// generator has one available.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("undeclared variable `{name}` read at line {line}, column {column}")]
    NameError {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("type error: {message} (line {line}, column {column})")]
    TypeError {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("unresolved label {label} at finalize()")]
    UnresolvedLabel { label: u32 },

    #[error("malformed input: {0}")]
    MalformedAst(String),

    #[error("lex error: {0}")]
    LexError(String),

    #[error("parse error: {0}")]
    ParseError(String),
}

/// A failure while decoding a `.pvm` container.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("bad magic bytes: expected 50 59 4D 56, found {0:02X?}")]
    BadMagic([u8; 4]),

    #[error("unsupported major version {found} (runtime supports {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("reserved flag bit set: {0:#06x}")]
    ReservedFlagSet(u16),

    #[error("truncated section: expected {expected} more bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("constant index {index} out of range (pool has {len} entries)")]
    ConstantOutOfRange { index: usize, len: usize },

    #[error("symbol index {index} out of range (table has {len} entries)")]
    SymbolOutOfRange { index: usize, len: usize },

    #[error("jump target {target} is not the start of an instruction")]
    BadJumpTarget { target: u32 },

    #[error("invalid constant type tag {0:#04x}")]
    InvalidConstantTag(u8),

    #[error("invalid opcode {0:#04x} in code section")]
    InvalidOpcode(u8),

    #[error("invalid symbol kind tag {0:#04x}")]
    InvalidSymbolKind(u8),

    #[error("invalid utf-8 in string constant: {0}")]
    InvalidUtf8(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// A failure that halted the running VM. Every variant carries the PC
/// at which the failure was detected so the driver can print one
/// diagnostic line plus the call-stack snapshot.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("arithmetic error at pc={pc:#06x}: {message}")]
    ArithmeticError { pc: u32, message: String },

    #[error("type error at pc={pc:#06x}: {message}")]
    TypeError { pc: u32, message: String },

    #[error("operand stack overflow at pc={pc:#06x} (max {max})")]
    StackOverflow { pc: u32, max: usize },

    #[error("operand stack underflow at pc={pc:#06x}")]
    StackUnderflow { pc: u32 },

    #[error("call stack overflow at pc={pc:#06x} (max {max})")]
    CallStackOverflow { pc: u32, max: usize },

    #[error("invalid opcode {opcode:#04x} at pc={pc:#06x}")]
    InvalidOpcode { pc: u32, opcode: u8 },

    #[error("RETURN with empty call stack at pc={pc:#06x}")]
    BadReturn { pc: u32 },

    #[error("I/O error: {0}")]
    Io(String),
}

/// Top-level error wrapping each stage's taxonomy, used at the CLI
/// boundary where a single `Display` line and an exit code are needed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exit code per the CLI contract: 0 success, 1 compile, 2 load,
    /// 3 runtime, 4 usage.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Compile(_) => 1,
            Error::Load(_) => 2,
            Error::Runtime(_) => 3,
            Error::Usage(_) => 4,
            Error::Io(_) => 4,
        }
    }
}
