//! Binary Container: a little-endian framed `.pvm` file — header,
//! constants, symbols, code, optional debug section — and the matched
//! pair of free functions that write and read it. Hand-rolled rather
//! than built on `bincode`/`serde`: a generic derive-based format would
//! not reproduce the exact field-by-field byte layout this format
//! fixes.

use std::io::{Read, Write};

use crate::error::LoadError;
use crate::pool::{Constant, ConstantPool};
use crate::symtab::{Symbol, SymbolKind, SymbolTable};

pub const MAGIC: [u8; 4] = *b"PYMV";
pub const CURRENT_VERSION: u16 = 0x0001;

/// `(pc, line, column)` debug-info entries, sorted by `pc` ascending.
pub type DebugTable = Vec<(u32, usize, usize)>;

/// The tuple `(version, flags, constants[], symbols[], code[], debug?)`
/// — corresponds 1:1 to the binary container.
#[derive(Debug, Clone)]
pub struct Program {
    pub version: u16,
    pub flags: u16,
    pub constants: ConstantPool,
    pub symbols: SymbolTable,
    pub code: Vec<u8>,
    pub debug: Option<DebugTable>,
}

const FLAG_DEBUG_PRESENT: u16 = 0x0001;
const RESERVED_FLAGS_MASK: u16 = !FLAG_DEBUG_PRESENT;

impl Program {
    pub fn has_debug(&self) -> bool {
        self.flags & FLAG_DEBUG_PRESENT != 0
    }
}

/// Serializes `program` to `out` per §4.3's exact layout.
pub fn write(program: &Program, out: &mut impl Write) -> std::io::Result<()> {
    out.write_all(&MAGIC)?;
    out.write_all(&program.version.to_le_bytes())?;
    out.write_all(&program.flags.to_le_bytes())?;
    out.write_all(&(program.constants.len() as u32).to_le_bytes())?;
    out.write_all(&(program.symbols.len() as u32).to_le_bytes())?;
    out.write_all(&(program.code.len() as u32).to_le_bytes())?;

    for constant in program.constants.iter() {
        write_constant(constant, out)?;
    }

    for symbol in program.symbols.iter() {
        write_symbol(symbol, out)?;
    }

    out.write_all(&program.code)?;

    if let Some(debug) = &program.debug {
        out.write_all(&(debug.len() as u32).to_le_bytes())?;
        for (pc, line, column) in debug {
            out.write_all(&pc.to_le_bytes())?;
            out.write_all(&(*line as u32).to_le_bytes())?;
            out.write_all(&(*column as u16).to_le_bytes())?;
        }
    }

    Ok(())
}

fn write_constant(constant: &Constant, out: &mut impl Write) -> std::io::Result<()> {
    out.write_all(&[constant.type_tag()])?;
    match constant {
        Constant::Int(i) => {
            out.write_all(&4u32.to_le_bytes())?;
            out.write_all(&i.to_le_bytes())?;
        }
        Constant::Float(f) => {
            out.write_all(&8u32.to_le_bytes())?;
            out.write_all(&f.to_le_bytes())?;
        }
        Constant::String(s) => {
            let bytes = s.as_bytes();
            out.write_all(&((bytes.len() + 1) as u32).to_le_bytes())?;
            out.write_all(bytes)?;
            out.write_all(&[0u8])?;
        }
        Constant::Bool(b) => {
            out.write_all(&1u32.to_le_bytes())?;
            out.write_all(&[*b as u8])?;
        }
    }
    Ok(())
}

fn write_symbol(symbol: &Symbol, out: &mut impl Write) -> std::io::Result<()> {
    let kind_tag: u8 = match symbol.kind {
        SymbolKind::Var => 0x01,
        SymbolKind::Func => 0x02,
    };
    out.write_all(&[kind_tag])?;
    let name_bytes = symbol.name.as_bytes();
    out.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
    out.write_all(name_bytes)?;
    out.write_all(&symbol.value.to_le_bytes())?;
    Ok(())
}

/// Reads and verifies a program from `input` per §4.3's loader rules:
/// magic, major-version compatibility, reserved flags, and in-range
/// constant/symbol/jump references.
pub fn read(input: &mut impl Read) -> Result<Program, LoadError> {
    let mut magic = [0u8; 4];
    read_exact(input, &mut magic)?;
    if magic != MAGIC {
        return Err(LoadError::BadMagic(magic));
    }

    let version = read_u16(input)?;
    if major_version(version) != major_version(CURRENT_VERSION) {
        return Err(LoadError::UnsupportedVersion {
            found: version,
            supported: CURRENT_VERSION,
        });
    }

    let flags = read_u16(input)?;
    if flags & RESERVED_FLAGS_MASK != 0 {
        return Err(LoadError::ReservedFlagSet(flags & RESERVED_FLAGS_MASK));
    }

    let const_count = read_u32(input)?;
    let symbol_count = read_u32(input)?;
    let code_size = read_u32(input)?;

    let mut constants = ConstantPool::new();
    for _ in 0..const_count {
        constants.intern(read_constant(input)?);
    }

    let mut symbols = SymbolTable::new();
    for _ in 0..symbol_count {
        symbols.push_raw(read_symbol(input)?);
    }

    let mut code = vec![0u8; code_size as usize];
    read_exact(input, &mut code)?;

    let debug = if flags & FLAG_DEBUG_PRESENT != 0 {
        let line_count = read_u32(input)?;
        let mut entries = Vec::with_capacity(line_count as usize);
        for _ in 0..line_count {
            let pc = read_u32(input)?;
            let line = read_u32(input)? as usize;
            let column = read_u16(input)? as usize;
            entries.push((pc, line, column));
        }
        Some(entries)
    } else {
        None
    };

    verify_references(&code, &constants, &symbols)?;

    Ok(Program {
        version,
        flags,
        constants,
        symbols,
        code,
        debug,
    })
}

fn major_version(v: u16) -> u16 {
    v & 0xFF00
}

fn verify_references(
    code: &[u8],
    constants: &ConstantPool,
    symbols: &SymbolTable,
) -> Result<(), LoadError> {
    use crate::opcode::{IndexFamily, Opcode, OperandWidth};

    let mut pc = 0usize;
    let mut instruction_starts = std::collections::HashSet::new();
    while pc < code.len() {
        instruction_starts.insert(pc as u32);
        let opcode = Opcode::from_byte(code[pc]).ok_or(LoadError::InvalidOpcode(code[pc]))?;
        let width = opcode.operand_width();
        let operand_start = pc + 1;
        let operand_end = operand_start + width.size();
        if operand_end > code.len() {
            return Err(LoadError::Truncated {
                expected: operand_end,
                found: code.len(),
            });
        }

        if let Some(family) = opcode.index_family() {
            let index = match width {
                OperandWidth::U8 => code[operand_start] as usize,
                OperandWidth::U16 => {
                    u16::from_le_bytes(code[operand_start..operand_end].try_into().unwrap())
                        as usize
                }
                _ => 0,
            };
            match family {
                IndexFamily::Const => {
                    if constants.get(index as u32).is_none() {
                        return Err(LoadError::ConstantOutOfRange {
                            index,
                            len: constants.len(),
                        });
                    }
                }
                IndexFamily::Var => {
                    if symbols.get(index as u32).is_none() {
                        return Err(LoadError::SymbolOutOfRange {
                            index,
                            len: symbols.len(),
                        });
                    }
                }
            }
        }

        if matches!(opcode, Opcode::Call) {
            let symbol_idx =
                u16::from_le_bytes(code[operand_start..operand_start + 2].try_into().unwrap());
            if symbols.get(symbol_idx as u32).is_none() {
                return Err(LoadError::SymbolOutOfRange {
                    index: symbol_idx as usize,
                    len: symbols.len(),
                });
            }
        }

        if matches!(opcode, Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfTrue) {
            let target =
                i32::from_le_bytes(code[operand_start..operand_end].try_into().unwrap());
            if target < 0 || target as usize >= code.len() {
                return Err(LoadError::BadJumpTarget { target: target as u32 });
            }
        }

        pc = operand_end;
    }

    // Second pass: every jump target must land on an instruction boundary
    // (or exactly at code_size, the implicit halt).
    pc = 0;
    while pc < code.len() {
        let opcode = Opcode::from_byte(code[pc]).expect("validated above");
        let width = opcode.operand_width();
        let operand_start = pc + 1;
        if matches!(opcode, Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfTrue) {
            let target = i32::from_le_bytes(
                code[operand_start..operand_start + 4].try_into().unwrap(),
            ) as u32;
            if !instruction_starts.contains(&target) {
                return Err(LoadError::BadJumpTarget { target });
            }
        }
        pc = operand_start + width.size();
    }

    Ok(())
}

fn read_constant(input: &mut impl Read) -> Result<Constant, LoadError> {
    let mut tag = [0u8; 1];
    read_exact(input, &mut tag)?;
    let size = read_u32(input)?;
    let mut data = vec![0u8; size as usize];
    read_exact(input, &mut data)?;

    match tag[0] {
        0x01 => Ok(Constant::Int(i32::from_le_bytes(
            data.as_slice().try_into().map_err(|_| LoadError::Truncated {
                expected: 4,
                found: data.len(),
            })?,
        ))),
        0x02 => Ok(Constant::Float(f64::from_le_bytes(
            data.as_slice().try_into().map_err(|_| LoadError::Truncated {
                expected: 8,
                found: data.len(),
            })?,
        ))),
        0x03 => {
            let without_nul = data.strip_suffix(&[0u8]).unwrap_or(&data);
            let s = std::str::from_utf8(without_nul)
                .map_err(|e| LoadError::InvalidUtf8(e.to_string()))?;
            Ok(Constant::String(s.to_string()))
        }
        0x04 => Ok(Constant::Bool(data.first().copied().unwrap_or(0) != 0)),
        other => Err(LoadError::InvalidConstantTag(other)),
    }
}

fn read_symbol(input: &mut impl Read) -> Result<Symbol, LoadError> {
    let mut kind_tag = [0u8; 1];
    read_exact(input, &mut kind_tag)?;
    let kind = match kind_tag[0] {
        0x01 => SymbolKind::Var,
        0x02 => SymbolKind::Func,
        other => return Err(LoadError::InvalidSymbolKind(other)),
    };
    let name_len = read_u16(input)? as usize;
    let mut name_bytes = vec![0u8; name_len];
    read_exact(input, &mut name_bytes)?;
    let name = String::from_utf8(name_bytes).map_err(|e| LoadError::InvalidUtf8(e.to_string()))?;
    let value = read_u32(input)?;
    Ok(Symbol { kind, name, value })
}

fn read_exact(input: &mut impl Read, buf: &mut [u8]) -> Result<(), LoadError> {
    input.read_exact(buf).map_err(|e| LoadError::Io(e.to_string()))
}

fn read_u16(input: &mut impl Read) -> Result<u16, LoadError> {
    let mut buf = [0u8; 2];
    read_exact(input, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(input: &mut impl Read) -> Result<u32, LoadError> {
    let mut buf = [0u8; 4];
    read_exact(input, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> Program {
        let mut constants = ConstantPool::new();
        let x_const = constants.intern(Constant::Int(10));
        let mut symbols = SymbolTable::new();
        let x_var = symbols.declare_var("x");

        let mut code = Vec::new();
        code.push(crate::opcode::Opcode::LoadConst as u8);
        code.push(x_const as u8);
        code.push(crate::opcode::Opcode::StoreVar as u8);
        code.push(x_var as u8);
        code.push(crate::opcode::Opcode::Halt as u8);

        Program {
            version: CURRENT_VERSION,
            flags: 0,
            constants,
            symbols,
            code,
            debug: None,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let program = sample_program();
        let mut bytes = Vec::new();
        write(&program, &mut bytes).unwrap();
        let loaded = read(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.version, program.version);
        assert_eq!(loaded.code, program.code);
        assert_eq!(loaded.constants.len(), program.constants.len());
        assert_eq!(loaded.symbols.len(), program.symbols.len());
    }

    #[test]
    fn header_starts_with_magic_and_version() {
        let program = sample_program();
        let mut bytes = Vec::new();
        write(&program, &mut bytes).unwrap();
        assert_eq!(&bytes[0..4], b"PYMV");
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), 0x0001);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = vec![0u8; 20];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(read(&mut bytes.as_slice()), Err(LoadError::BadMagic(_))));
    }

    #[test]
    fn major_version_mismatch_is_rejected() {
        let program = sample_program();
        let mut bytes = Vec::new();
        write(&program, &mut bytes).unwrap();
        bytes[4] = 0x00;
        bytes[5] = 0x02; // major version 2
        assert!(matches!(
            read(&mut bytes.as_slice()),
            Err(LoadError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn out_of_range_constant_index_is_rejected() {
        let mut program = sample_program();
        program.code[1] = 99; // LOAD_CONST references a nonexistent index
        let mut bytes = Vec::new();
        write(&program, &mut bytes).unwrap();
        assert!(matches!(
            read(&mut bytes.as_slice()),
            Err(LoadError::ConstantOutOfRange { .. })
        ));
    }
}
