//! Disassembler: one line per instruction, with constants and symbol
//! names inlined, reused by both `--show-bytecode` and `--info`.

use std::fmt::Write as _;

use crate::container::Program;
use crate::opcode::{Opcode, OperandWidth};

/// Renders every instruction in `program.code` as `offset  OPCODE
/// operand_pretty`, one per line.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let code = &program.code;
    let mut pc = 0usize;

    while pc < code.len() {
        let opcode = match Opcode::from_byte(code[pc]) {
            Some(op) => op,
            None => {
                let _ = writeln!(out, "{pc:06x}  <invalid opcode {:#04x}>", code[pc]);
                pc += 1;
                continue;
            }
        };
        let width = opcode.operand_width();
        let operand_start = pc + 1;
        let operand_end = operand_start + width.size();
        if operand_end > code.len() {
            let _ = writeln!(out, "{pc:06x}  {}  <truncated operand>", opcode.mnemonic());
            break;
        }
        let operand = &code[operand_start..operand_end];
        let pretty = describe_operand(program, opcode, width, operand);

        let _ = write!(out, "{pc:06x}  {}", opcode.mnemonic());
        if !pretty.is_empty() {
            let _ = write!(out, "  {pretty}");
        }
        let _ = writeln!(out);

        pc = operand_end;
    }

    out
}

fn describe_operand(program: &Program, opcode: Opcode, width: OperandWidth, operand: &[u8]) -> String {
    match width {
        OperandWidth::None => String::new(),
        OperandWidth::U8 | OperandWidth::U16 => {
            let index = read_index(width, operand);
            match opcode {
                Opcode::LoadConst | Opcode::LoadConstW => program
                    .constants
                    .get(index)
                    .map(|c| format!("{index} ; {}", c.to_value()))
                    .unwrap_or_else(|| format!("{index} ; <out of range>")),
                Opcode::LoadVar | Opcode::LoadVarW | Opcode::StoreVar | Opcode::StoreVarW => {
                    program
                        .symbols
                        .get(index)
                        .map(|s| format!("{index} ; {}", s.name))
                        .unwrap_or_else(|| format!("{index} ; <out of range>"))
                }
                _ => index.to_string(),
            }
        }
        OperandWidth::I32 => {
            let target = i32::from_le_bytes(operand.try_into().unwrap());
            format!("{target:#06x}")
        }
        OperandWidth::CallOperand => {
            let symbol_idx = u16::from_le_bytes([operand[0], operand[1]]) as u32;
            let argc = operand[2];
            let name = program
                .symbols
                .get(symbol_idx)
                .map(|s| s.name.as_str())
                .unwrap_or("<out of range>");
            format!("{symbol_idx} ; {name}, argc={argc}")
        }
    }
}

fn read_index(width: OperandWidth, operand: &[u8]) -> u32 {
    match width {
        OperandWidth::U8 => operand[0] as u32,
        OperandWidth::U16 => u16::from_le_bytes([operand[0], operand[1]]) as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Codegen;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    #[test]
    fn disassembly_inlines_constants_and_symbol_names() {
        let tokens = Lexer::new("x = 10; print(x);").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Codegen::compile(&ast, false).unwrap();
        let text = disassemble(&program);
        assert!(text.contains("LOAD_CONST") || text.contains("LoadConst"));
        assert!(text.contains("; x") || text.contains("x,"));
        assert!(text.contains("HALT") || text.contains("Halt"));
    }
}
