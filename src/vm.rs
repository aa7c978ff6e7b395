//! The stack virtual machine: program counter, decode/dispatch loop,
//! variable store, and the two runtime stacks, wired to a `Program`'s
//! read-only constant/symbol tables. Dispatch decodes through the dense
//! `opcode::DISPATCH` table rather than falling through a wildcard
//! match arm for an unrecognized byte.

use std::io::{BufRead, Write};

use crate::container::Program;
use crate::error::RuntimeError;
use crate::opcode::{Opcode, DISPATCH};
use crate::symtab::{builtin, SymbolKind};
use crate::value::Value;

/// `(return_pc, base_of_locals, saved_operand_stack_depth)`.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    return_pc: u32,
    #[allow(dead_code)]
    base_of_locals: usize,
    saved_depth: usize,
}

pub struct VmOptions {
    pub max_operand_stack: usize,
    pub max_call_frames: usize,
    pub trace: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            max_operand_stack: 1024,
            max_call_frames: 256,
            trace: false,
        }
    }
}

pub struct Vm<'p, R, W> {
    program: &'p Program,
    pc: u32,
    operand_stack: Vec<Value>,
    call_stack: Vec<CallFrame>,
    vars: Vec<Value>,
    options: VmOptions,
    stdin: R,
    stdout: W,
}

impl<'p, R: BufRead, W: Write> Vm<'p, R, W> {
    pub fn new(program: &'p Program, stdin: R, stdout: W, options: VmOptions) -> Self {
        let var_count = program.symbols.var_count() as usize;
        Vm {
            program,
            pc: 0,
            operand_stack: Vec::new(),
            call_stack: Vec::new(),
            vars: vec![Value::Null; var_count],
            options,
            stdin,
            stdout,
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.operand_stack.len() >= self.options.max_operand_stack {
            return Err(RuntimeError::StackOverflow {
                pc: self.pc,
                max: self.options.max_operand_stack,
            });
        }
        self.operand_stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.operand_stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow { pc: self.pc })
    }

    /// Runs the dispatch loop to completion: `HALT` or `PC >= code_size`.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let code = &self.program.code;
        loop {
            if self.pc as usize >= code.len() {
                return Ok(());
            }
            let opcode_byte = code[self.pc as usize];
            let Some(opcode) = DISPATCH[opcode_byte as usize] else {
                return Err(RuntimeError::InvalidOpcode {
                    pc: self.pc,
                    opcode: opcode_byte,
                });
            };

            if self.options.trace {
                tracing::trace!(pc = self.pc, opcode = opcode.mnemonic(), "dispatch");
            }

            let operand_start = self.pc as usize + 1;
            let width = opcode.operand_width().size();
            self.pc = (operand_start + width) as u32;

            if opcode == Opcode::Halt {
                return Ok(());
            }

            self.execute(opcode, &code[operand_start..operand_start + width])?;
        }
    }

    fn execute(&mut self, opcode: Opcode, operand: &[u8]) -> Result<(), RuntimeError> {
        match opcode {
            Opcode::Nop => {}
            Opcode::LoadConst => self.load_const(operand[0] as u32)?,
            Opcode::LoadConstW => self.load_const(u16::from_le_bytes([operand[0], operand[1]]) as u32)?,
            Opcode::LoadVar => self.load_var(operand[0] as u32)?,
            Opcode::LoadVarW => self.load_var(u16::from_le_bytes([operand[0], operand[1]]) as u32)?,
            Opcode::StoreVar => self.store_var(operand[0] as u32)?,
            Opcode::StoreVarW => self.store_var(u16::from_le_bytes([operand[0], operand[1]]) as u32)?,

            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self.pop()?;
                self.push(top.clone())?;
                self.push(top)?;
            }
            Opcode::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }

            Opcode::Add => self.arith(|a, b| arith_add(a, b), self.pc)?,
            Opcode::Sub => self.arith(
                |a, b| arith_numeric(a, b, "-", i32::wrapping_sub, |x, y| x - y),
                self.pc,
            )?,
            Opcode::Mul => self.arith(
                |a, b| arith_numeric(a, b, "*", i32::wrapping_mul, |x, y| x * y),
                self.pc,
            )?,
            Opcode::Div => self.div(self.pc)?,
            Opcode::Mod => self.rem(self.pc)?,
            Opcode::Neg => self.neg(self.pc)?,

            Opcode::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b))?;
            }
            Opcode::Neq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a != b))?;
            }
            Opcode::Lt => self.compare(self.pc, |o| o == std::cmp::Ordering::Less)?,
            Opcode::Le => self.compare(self.pc, |o| o != std::cmp::Ordering::Greater)?,
            Opcode::Gt => self.compare(self.pc, |o| o == std::cmp::Ordering::Greater)?,
            Opcode::Ge => self.compare(self.pc, |o| o != std::cmp::Ordering::Less)?,

            Opcode::And => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a.is_truthy() && b.is_truthy()))?;
            }
            Opcode::Or => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a.is_truthy() || b.is_truthy()))?;
            }
            Opcode::Not => {
                let a = self.pop()?;
                self.push(Value::Bool(!a.is_truthy()))?;
            }

            Opcode::Jmp => {
                self.pc = i32::from_le_bytes(operand.try_into().unwrap()) as u32;
            }
            Opcode::JmpIfFalse => {
                let cond = self.pop()?;
                if !cond.is_truthy() {
                    self.pc = i32::from_le_bytes(operand.try_into().unwrap()) as u32;
                }
            }
            Opcode::JmpIfTrue => {
                let cond = self.pop()?;
                if cond.is_truthy() {
                    self.pc = i32::from_le_bytes(operand.try_into().unwrap()) as u32;
                }
            }

            Opcode::Call => self.call(operand)?,
            Opcode::Return => self.do_return()?,

            Opcode::Print => self.do_print(1)?,
            Opcode::Input => self.do_input(0)?,

            Opcode::Halt => unreachable!("handled in run()"),
        }
        Ok(())
    }

    fn load_const(&mut self, idx: u32) -> Result<(), RuntimeError> {
        let constant = self
            .program
            .constants
            .get(idx)
            .expect("loader verified constant indices are in range");
        self.push(constant.to_value())
    }

    fn load_var(&mut self, symbol_idx: u32) -> Result<(), RuntimeError> {
        let symbol = self
            .program
            .symbols
            .get(symbol_idx)
            .expect("loader verified symbol indices are in range");
        let value = self.vars[symbol.value as usize].clone();
        self.push(value)
    }

    fn store_var(&mut self, symbol_idx: u32) -> Result<(), RuntimeError> {
        let symbol = self
            .program
            .symbols
            .get(symbol_idx)
            .expect("loader verified symbol indices are in range");
        let slot = symbol.value as usize;
        let value = self.pop()?;
        self.vars[slot] = value;
        Ok(())
    }

    fn arith(
        &mut self,
        op: impl FnOnce(Value, Value) -> Result<Value, String>,
        pc: u32,
    ) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = op(a, b).map_err(|message| RuntimeError::TypeError { pc, message })?;
        self.push(result)
    }

    fn div(&mut self, pc: u32) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Integer(_), Value::Integer(0)) => Err(RuntimeError::ArithmeticError {
                pc,
                message: "division by zero".to_string(),
            }),
            (Value::Integer(x), Value::Integer(y)) => self.push(Value::Integer(x.wrapping_div(*y))),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let x = as_f64(&a);
                let y = as_f64(&b);
                if y == 0.0 {
                    Err(RuntimeError::ArithmeticError {
                        pc,
                        message: "division by zero".to_string(),
                    })
                } else {
                    self.push(Value::Float(x / y))
                }
            }
            _ => Err(RuntimeError::TypeError {
                pc,
                message: format!("cannot divide {} by {}", a.type_name(), b.type_name()),
            }),
        }
    }

    fn rem(&mut self, pc: u32) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Integer(_), Value::Integer(0)) => Err(RuntimeError::ArithmeticError {
                pc,
                message: "modulo by zero".to_string(),
            }),
            (Value::Integer(x), Value::Integer(y)) => self.push(Value::Integer(x.wrapping_rem(*y))),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let x = as_f64(&a);
                let y = as_f64(&b);
                if y == 0.0 {
                    Err(RuntimeError::ArithmeticError {
                        pc,
                        message: "modulo by zero".to_string(),
                    })
                } else {
                    self.push(Value::Float(x % y))
                }
            }
            _ => Err(RuntimeError::TypeError {
                pc,
                message: format!("cannot apply `%` to {} and {}", a.type_name(), b.type_name()),
            }),
        }
    }

    fn neg(&mut self, pc: u32) -> Result<(), RuntimeError> {
        let a = self.pop()?;
        match a {
            Value::Integer(i) => self.push(Value::Integer(i.wrapping_neg())),
            Value::Float(f) => self.push(Value::Float(-f)),
            other => Err(RuntimeError::TypeError {
                pc,
                message: format!("cannot negate a {}", other.type_name()),
            }),
        }
    }

    fn compare(
        &mut self,
        pc: u32,
        matches_ordering: impl FnOnce(std::cmp::Ordering) -> bool,
    ) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ordering = match (&a, &b) {
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                as_f64(&a)
                    .partial_cmp(&as_f64(&b))
                    .ok_or_else(|| RuntimeError::TypeError {
                        pc,
                        message: "NaN is not ordered".to_string(),
                    })?
            }
            (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
            _ => {
                return Err(RuntimeError::TypeError {
                    pc,
                    message: format!("cannot compare {} and {}", a.type_name(), b.type_name()),
                })
            }
        };
        self.push(Value::Bool(matches_ordering(ordering)))
    }

    fn call(&mut self, operand: &[u8]) -> Result<(), RuntimeError> {
        let symbol_idx = u16::from_le_bytes([operand[0], operand[1]]) as u32;
        let argc = operand[2] as usize;
        let symbol = self
            .program
            .symbols
            .get(symbol_idx)
            .expect("loader verified symbol indices are in range");
        debug_assert_eq!(symbol.kind, SymbolKind::Func);

        match symbol.value {
            tag if tag == builtin::PRINT => self.do_print(argc),
            tag if tag == builtin::INPUT => self.do_input(argc),
            target => {
                if self.call_stack.len() >= self.options.max_call_frames {
                    return Err(RuntimeError::CallStackOverflow {
                        pc: self.pc,
                        max: self.options.max_call_frames,
                    });
                }
                self.call_stack.push(CallFrame {
                    return_pc: self.pc,
                    base_of_locals: self.vars.len(),
                    saved_depth: self.operand_stack.len() - argc,
                });
                self.pc = target;
                Ok(())
            }
        }
    }

    fn do_return(&mut self) -> Result<(), RuntimeError> {
        let frame = self
            .call_stack
            .pop()
            .ok_or(RuntimeError::BadReturn { pc: self.pc })?;
        let return_value = self.pop()?;
        self.operand_stack.truncate(frame.saved_depth);
        self.push(return_value)?;
        self.pc = frame.return_pc;
        Ok(())
    }

    fn do_print(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();
        let line = args
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(self.stdout, "{line}").map_err(|e| RuntimeError::Io(e.to_string()))?;
        self.push(Value::Null)
    }

    fn do_input(&mut self, argc: usize) -> Result<(), RuntimeError> {
        if argc > 0 {
            let prompt = self.pop()?;
            write!(self.stdout, "{prompt}").map_err(|e| RuntimeError::Io(e.to_string()))?;
            self.stdout.flush().map_err(|e| RuntimeError::Io(e.to_string()))?;
        }
        let mut line = String::new();
        self.stdin
            .read_line(&mut line)
            .map_err(|e| RuntimeError::Io(e.to_string()))?;
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        self.push(Value::String(line))
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => unreachable!("caller already matched on numeric variants"),
    }
}

/// Integer arithmetic wraps on overflow (two's-complement, matching
/// the 32-bit width `Value::Integer` already commits to) rather than
/// panicking or promoting to a wider type; only explicit division and
/// modulo by zero are reported as `ArithmeticError`.
fn arith_add(a: Value, b: Value) -> Result<Value, String> {
    match (&a, &b) {
        (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}"))),
        (Value::String(_), _) | (_, Value::String(_)) => Err(format!(
            "cannot add {} and {}",
            a.type_name(),
            b.type_name()
        )),
        (Value::Integer(x), Value::Integer(y)) => Ok(Value::Integer(x.wrapping_add(*y))),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Ok(Value::Float(as_f64(&a) + as_f64(&b)))
        }
        _ => Err(format!("cannot add {} and {}", a.type_name(), b.type_name())),
    }
}

fn arith_numeric(
    a: Value,
    b: Value,
    symbol: &str,
    int_op: impl FnOnce(i32, i32) -> i32,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> Result<Value, String> {
    match (&a, &b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Value::Integer(int_op(*x, *y))),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Ok(Value::Float(float_op(as_f64(&a), as_f64(&b))))
        }
        _ => Err(format!(
            "cannot apply `{symbol}` to {} and {}",
            a.type_name(),
            b.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Codegen;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use std::io::Cursor;

    fn run_source(src: &str) -> String {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Codegen::compile(&ast, false).unwrap();

        let stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();
        {
            let mut vm = Vm::new(&program, stdin, &mut stdout, VmOptions::default());
            vm.run().unwrap();
        }
        String::from_utf8(stdout).unwrap()
    }

    fn run_source_err(src: &str) -> RuntimeError {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Codegen::compile(&ast, false).unwrap();
        let stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();
        let mut vm = Vm::new(&program, stdin, &mut stdout, VmOptions::default());
        vm.run().unwrap_err()
    }

    #[test]
    fn scenario_one_assignment_and_print() {
        assert_eq!(run_source("x = 10; y = 20; print(x + y);"), "30\n");
    }

    #[test]
    fn scenario_two_while_loop() {
        assert_eq!(
            run_source("i = 0; while (i < 3) { print(i); i = i + 1; }"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn scenario_three_if_else() {
        assert_eq!(
            run_source(r#"x = 5; if (x > 0) { print("pos"); } else { print("neg"); }"#),
            "pos\n"
        );
    }

    #[test]
    fn scenario_four_division_by_zero() {
        assert!(matches!(
            run_source_err("print(1 / 0);"),
            RuntimeError::ArithmeticError { .. }
        ));
    }

    #[test]
    fn integer_overflow_wraps_instead_of_panicking() {
        assert_eq!(run_source("print(2147483647 + 1);"), "-2147483648\n");
        assert_eq!(run_source("print(-2147483648 - 1);"), "2147483647\n");
        assert_eq!(run_source("print(2147483647 * 2);"), "-2\n");
        assert_eq!(run_source("print(-(-2147483648));"), "-2147483648\n");
    }

    #[test]
    fn invalid_opcode_byte_is_a_runtime_error() {
        let tokens = Lexer::new("x = 1;").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Codegen::compile(&ast, false).unwrap();
        let mut bad_program = program;
        bad_program.code[0] = 0x99;
        let stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();
        let mut vm = Vm::new(&bad_program, stdin, &mut stdout, VmOptions::default());
        assert!(matches!(
            vm.run().unwrap_err(),
            RuntimeError::InvalidOpcode { opcode: 0x99, .. }
        ));
    }

    #[test]
    fn stack_discipline_after_statement_span() {
        let tokens = Lexer::new("x = 1; y = 2; print(x + y);").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Codegen::compile(&ast, false).unwrap();
        let stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();
        let mut vm = Vm::new(&program, stdin, &mut stdout, VmOptions::default());
        vm.run().unwrap();
        assert_eq!(vm.operand_stack.len(), 0);
    }
}
