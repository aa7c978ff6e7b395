//! Code generator: walks the AST in program order, appending to the
//! constant pool, symbol table, and code buffer, resolving control-flow
//! labels via the label/patch-list technique along the way, to this
//! grammar's codegen contracts (§4.2).

use crate::ast::{BinOp, Expr, Literal, Program as Ast, Spanned, Stmt, UnaryOp};
use crate::chunk::CodeBuffer;
use crate::container::Program;
use crate::error::CompileError;
use crate::opcode::Opcode;
use crate::pool::{Constant, ConstantPool};
use crate::symtab::{builtin, SymbolTable};

/// Codegen resolves the narrow-vs-wide operand choice (§4.1's Open
/// Question) once per compilation rather than rewriting already-
/// emitted bytes: a lightweight pre-pass counts how many distinct
/// constants/variables the program will produce, and the real emission
/// pass picks the narrow or wide opcode family for the whole
/// compilation accordingly. This keeps every opcode's operand width
/// static without needing to shift already-emitted offsets (and every
/// jump target already computed against them) after the fact.
struct TableWidths {
    wide_const: bool,
    wide_var: bool,
}

fn scan_table_widths(ast: &Ast) -> TableWidths {
    let mut pool = ConstantPool::new();
    let mut vars = SymbolTable::new();
    for stmt in &ast.statements {
        scan_stmt(stmt, &mut pool, &mut vars);
    }
    TableWidths {
        wide_const: pool.len() > 256,
        wide_var: vars.var_count() > 256,
    }
}

fn scan_stmt(stmt: &Spanned<Stmt>, pool: &mut ConstantPool, vars: &mut SymbolTable) {
    match &stmt.node {
        Stmt::Expr(e) => scan_expr(e, pool, vars),
        Stmt::Assign(name, e) => {
            vars.declare_var(name);
            scan_expr(e, pool, vars);
        }
        Stmt::If(cond, then_body, else_body) => {
            scan_expr(cond, pool, vars);
            for s in then_body {
                scan_stmt(s, pool, vars);
            }
            if let Some(body) = else_body {
                for s in body {
                    scan_stmt(s, pool, vars);
                }
            }
        }
        Stmt::While(cond, body) => {
            scan_expr(cond, pool, vars);
            for s in body {
                scan_stmt(s, pool, vars);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                scan_stmt(s, pool, vars);
            }
        }
    }
}

fn scan_expr(expr: &Expr, pool: &mut ConstantPool, vars: &mut SymbolTable) {
    match expr {
        Expr::Literal(lit) => {
            pool.intern(literal_to_constant(lit));
        }
        Expr::Var(name) => {
            vars.declare_var(name);
        }
        Expr::Unary(_, inner) => scan_expr(inner, pool, vars),
        Expr::Binary(_, lhs, rhs) => {
            scan_expr(lhs, pool, vars);
            scan_expr(rhs, pool, vars);
        }
        Expr::Call(_, args) => {
            for a in args {
                scan_expr(a, pool, vars);
            }
        }
    }
}

fn literal_to_constant(lit: &Literal) -> Constant {
    match lit {
        Literal::Integer(i) => Constant::Int(*i),
        Literal::Float(f) => Constant::Float(*f),
        Literal::String(s) => Constant::String(s.clone()),
        Literal::Bool(b) => Constant::Bool(*b),
    }
}

/// The type a literal statically carries, used only for the narrow
/// class of type errors the generator can prove at compile time
/// (scenario 6: a literal string added to a literal int).
fn static_literal_type(expr: &Expr) -> Option<&'static str> {
    match expr {
        Expr::Literal(Literal::Integer(_)) => Some("int"),
        Expr::Literal(Literal::Float(_)) => Some("float"),
        Expr::Literal(Literal::String(_)) => Some("string"),
        Expr::Literal(Literal::Bool(_)) => Some("bool"),
        _ => None,
    }
}

fn numeric(kind: &str) -> bool {
    kind == "int" || kind == "float"
}

pub struct Codegen {
    pool: ConstantPool,
    symtab: SymbolTable,
    code: CodeBuffer,
    debug: Vec<(u32, usize, usize)>,
    debug_enabled: bool,
    widths: TableWidths,
    depth: i64,
}

impl Codegen {
    pub fn new(debug_enabled: bool) -> Self {
        Codegen {
            pool: ConstantPool::new(),
            symtab: SymbolTable::new(),
            code: CodeBuffer::new(),
            debug: Vec::new(),
            debug_enabled,
            widths: TableWidths { wide_const: false, wide_var: false },
            depth: 0,
        }
    }

    pub fn compile(ast: &Ast, debug_enabled: bool) -> Result<Program, CompileError> {
        let mut gen = Codegen::new(debug_enabled);
        gen.widths = scan_table_widths(ast);
        gen.symtab.declare_builtin("print", builtin::PRINT);
        gen.symtab.declare_builtin("input", builtin::INPUT);

        for stmt in &ast.statements {
            gen.compile_stmt(stmt)?;
        }
        gen.code.emit_op(Opcode::Halt);

        let code = gen.code.finalize()?;
        Ok(Program {
            version: crate::container::CURRENT_VERSION,
            flags: if debug_enabled { 0x0001 } else { 0x0000 },
            constants: gen.pool,
            symbols: gen.symtab,
            code,
            debug: if debug_enabled { Some(gen.debug) } else { None },
        })
    }

    fn record_debug(&mut self, line: usize, column: usize) {
        if self.debug_enabled {
            self.debug.push((self.code.pos(), line, column));
        }
    }

    fn compile_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), CompileError> {
        debug_assert_eq!(self.depth, 0, "statements must start at depth 0");
        self.record_debug(stmt.line, stmt.column);
        match &stmt.node {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.code.emit_op(Opcode::Pop);
                self.depth -= 1;
            }
            Stmt::Assign(name, e) => {
                self.compile_expr(e)?;
                let idx = self.symtab.declare_var(name);
                self.emit_indexed(
                    self.widths.wide_var,
                    Opcode::StoreVar,
                    Opcode::StoreVarW,
                    idx,
                );
                self.depth -= 1;
            }
            Stmt::If(cond, then_body, else_body) => {
                self.compile_expr(cond)?;
                self.depth -= 1;
                let else_label = self.code.new_label();
                self.code.emit_jump(Opcode::JmpIfFalse, else_label);
                for s in then_body {
                    self.compile_stmt(s)?;
                }
                let end_label = self.code.new_label();
                if else_body.is_some() {
                    self.code.emit_jump(Opcode::Jmp, end_label);
                }
                self.code.bind_label(else_label);
                if let Some(body) = else_body {
                    for s in body {
                        self.compile_stmt(s)?;
                    }
                    self.code.bind_label(end_label);
                }
            }
            Stmt::While(cond, body) => {
                let loop_top = self.code.pos();
                self.compile_expr(cond)?;
                self.depth -= 1;
                let loop_end = self.code.new_label();
                self.code.emit_jump(Opcode::JmpIfFalse, loop_end);
                for s in body {
                    self.compile_stmt(s)?;
                }
                self.code.emit_op(Opcode::Jmp);
                let patch_site = self.code.emit_i32_placeholder();
                self.code.patch_addr(patch_site, loop_top);
                self.code.bind_label(loop_end);
            }
            Stmt::Block(body) => {
                for s in body {
                    self.compile_stmt(s)?;
                }
            }
        }
        debug_assert_eq!(self.depth, 0, "statements must end at depth 0");
        Ok(())
    }

    fn emit_indexed(&mut self, wide: bool, narrow: Opcode, wide_op: Opcode, idx: u32) {
        if wide {
            self.code.emit_op(wide_op);
            self.code.emit_u16(idx as u16);
        } else {
            self.code.emit_op(narrow);
            self.code.emit_u8(idx as u8);
        }
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(lit) => {
                let idx = self.pool.intern(literal_to_constant(lit));
                self.emit_indexed(self.widths.wide_const, Opcode::LoadConst, Opcode::LoadConstW, idx);
                self.depth += 1;
            }
            Expr::Var(name) => {
                let idx = self.symtab.find(name).ok_or_else(|| CompileError::NameError {
                    name: name.clone(),
                    line: 0,
                    column: 0,
                })?;
                self.emit_indexed(self.widths.wide_var, Opcode::LoadVar, Opcode::LoadVarW, idx);
                self.depth += 1;
            }
            Expr::Unary(op, inner) => {
                self.compile_expr(inner)?;
                match op {
                    UnaryOp::Neg => self.code.emit_op(Opcode::Neg),
                    UnaryOp::Not => self.code.emit_op(Opcode::Not),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                self.check_static_types(*op, lhs, rhs)?;
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.depth -= 1;
                self.code.emit_op(binop_to_opcode(*op));
            }
            Expr::Call(name, args) => {
                let Some(sym_idx) = self.symtab.find(name) else {
                    return Err(CompileError::NameError {
                        name: name.clone(),
                        line: 0,
                        column: 0,
                    });
                };
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.code.emit_op(Opcode::Call);
                self.code.emit_u16(sym_idx as u16);
                self.code.emit_u8(args.len() as u8);
                self.depth -= args.len() as i64;
                self.depth += 1;
            }
        }
        Ok(())
    }

    /// The narrow, compile-time-decidable slice of §4.1's type-error
    /// rules: a literal `String` combined with a literal non-`String`
    /// through an arithmetic operator is a `CompileError`, not a
    /// deferred `RuntimeError` (scenario 6).
    fn check_static_types(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), CompileError> {
        if !matches!(
            op,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        ) {
            return Ok(());
        }
        let (Some(lk), Some(rk)) = (static_literal_type(lhs), static_literal_type(rhs)) else {
            return Ok(());
        };
        let is_concat = op == BinOp::Add && lk == "string" && rk == "string";
        if is_concat {
            return Ok(());
        }
        if lk == "string" || rk == "string" {
            return Err(CompileError::TypeError {
                message: format!("cannot apply arithmetic operator to `{lk}` and `{rk}`"),
                line: 0,
                column: 0,
            });
        }
        if !numeric(lk) || !numeric(rk) {
            return Err(CompileError::TypeError {
                message: format!("cannot apply arithmetic operator to `{lk}` and `{rk}`"),
                line: 0,
                column: 0,
            });
        }
        Ok(())
    }
}

fn binop_to_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        BinOp::Eq => Opcode::Eq,
        BinOp::Neq => Opcode::Neq,
        BinOp::Lt => Opcode::Lt,
        BinOp::Le => Opcode::Le,
        BinOp::Gt => Opcode::Gt,
        BinOp::Ge => Opcode::Ge,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile(src: &str) -> Program {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        Codegen::compile(&ast, false).unwrap()
    }

    #[test]
    fn assignment_interns_constants_once() {
        let program = compile("x = 10; y = 10; print(x);");
        assert_eq!(program.constants.len(), 1);
    }

    #[test]
    fn ends_in_halt() {
        let program = compile("x = 1;");
        assert_eq!(*program.code.last().unwrap(), Opcode::Halt as u8);
    }

    #[test]
    fn undeclared_read_is_name_error() {
        let tokens = Lexer::new("print(a);").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        assert!(matches!(
            Codegen::compile(&ast, false),
            Err(CompileError::NameError { .. })
        ));
    }

    #[test]
    fn literal_string_plus_int_is_compile_time_type_error() {
        let tokens = Lexer::new(r#"print("a" + 1);"#).tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        assert!(matches!(
            Codegen::compile(&ast, false),
            Err(CompileError::TypeError { .. })
        ));
    }

    #[test]
    fn while_loop_has_one_backward_jump_and_one_conditional() {
        let program = compile("i = 0; while (i < 3) { print(i); i = i + 1; }");
        let jmp_count = program
            .code
            .iter()
            .filter(|&&b| b == Opcode::Jmp as u8)
            .count();
        let jif_count = program
            .code
            .iter()
            .filter(|&&b| b == Opcode::JmpIfFalse as u8)
            .count();
        assert_eq!(jmp_count, 1);
        assert_eq!(jif_count, 1);
    }

    #[test]
    fn debug_enabled_records_one_entry_per_statement() {
        let tokens = Lexer::new("x = 1;\ny = 2;\nprint(x + y);").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Codegen::compile(&ast, true).unwrap();
        let debug = program.debug.expect("debug section requested");
        assert_eq!(debug.len(), 3);
        assert_eq!(debug[0].1, 1);
        assert_eq!(debug[1].1, 2);
        assert_eq!(debug[2].1, 3);
        assert!(program.has_debug());
    }

    #[test]
    fn debug_disabled_omits_the_section() {
        let program = compile("x = 1;");
        assert!(program.debug.is_none());
        assert!(!program.has_debug());
    }

    #[test]
    fn distinct_string_constants_for_if_else_branches() {
        let program = compile(r#"x = 5; if (x > 0) { print("pos"); } else { print("neg"); }"#);
        let strings: Vec<_> = program
            .constants
            .iter()
            .filter_map(|c| match c {
                Constant::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        assert!(strings.contains(&"pos".to_string()));
        assert!(strings.contains(&"neg".to_string()));
    }
}
