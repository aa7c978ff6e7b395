//! Recursive-descent parser over the token stream, producing an AST.

use crate::ast::{BinOp, Expr, Literal, Program, Spanned, Stmt, UnaryOp};
use crate::error::CompileError;
use crate::token::{Token, TokenWithSpan};

pub struct Parser {
    tokens: Vec<TokenWithSpan>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<TokenWithSpan>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).map(|t| &t.token).unwrap_or(&Token::Eof)
    }

    fn line_col(&self) -> (usize, usize) {
        self.tokens
            .get(self.pos)
            .map(|t| (t.line, t.column))
            .unwrap_or((0, 0))
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        if self.current() == &expected {
            self.advance();
            Ok(())
        } else {
            let (line, column) = self.line_col();
            Err(CompileError::ParseError(format!(
                "expected {:?}, found {:?} at line {line}, column {column}",
                expected,
                self.current()
            )))
        }
    }

    fn at(&self, token: &Token) -> bool {
        self.current() == token
    }

    pub fn parse(&mut self) -> Result<Program, CompileError> {
        let mut program = Program::new();
        while !self.at(&Token::Eof) {
            program.statements.push(self.parse_spanned_statement()?);
        }
        Ok(program)
    }

    fn parse_block(&mut self) -> Result<Vec<Spanned<Stmt>>, CompileError> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&Token::RBrace) && !self.at(&Token::Eof) {
            stmts.push(self.parse_spanned_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_spanned_statement(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let (line, column) = self.line_col();
        let stmt = self.parse_statement()?;
        Ok(Spanned::new(stmt, line, column))
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        match self.current().clone() {
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            Token::Ident(name) if self.peek_is_assign() => {
                self.advance();
                self.advance(); // '='
                let value = self.parse_expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Assign(name, value))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn peek_is_assign(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.token),
            Some(Token::Assign)
        )
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        self.advance(); // 'if'
        self.expect(Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let then_body = self.parse_block()?;
        let else_body = if self.at(&Token::Else) {
            self.advance();
            if self.at(&Token::If) {
                let (line, column) = self.line_col();
                let nested = self.parse_if()?;
                Some(vec![Spanned::new(nested, line, column)])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If(cond, then_body, else_body))
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        self.advance(); // 'while'
        self.expect(Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::While(cond, body))
    }

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.at(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_equality()?;
        while self.at(&Token::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Neq,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        match self.current() {
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Not => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_call(),
        }
    }

    fn parse_call(&mut self) -> Result<Expr, CompileError> {
        let primary = self.parse_primary()?;
        if let Expr::Var(name) = &primary {
            if self.at(&Token::LParen) {
                self.advance();
                let mut args = Vec::new();
                if !self.at(&Token::RParen) {
                    args.push(self.parse_expr()?);
                    while self.at(&Token::Comma) {
                        self.advance();
                        args.push(self.parse_expr()?);
                    }
                }
                self.expect(Token::RParen)?;
                return Ok(Expr::Call(name.clone(), args));
            }
        }
        Ok(primary)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let (line, column) = self.line_col();
        match self.current().clone() {
            Token::Integer(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Integer(n)))
            }
            Token::Float(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(n)))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Var(name))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            other => Err(CompileError::ParseError(format!(
                "unexpected token {other:?} at line {line}, column {column}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> Program {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    #[test]
    fn assignment_and_print_call() {
        let program = parse("x = 10; y = 20; print(x + y);");
        assert_eq!(program.statements.len(), 3);
        assert_eq!(
            program.statements[0].node,
            Stmt::Assign("x".into(), Expr::Literal(Literal::Integer(10)))
        );
        match &program.statements[2].node {
            Stmt::Expr(Expr::Call(name, args)) => {
                assert_eq!(name, "print");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected a print call, got {other:?}"),
        }
    }

    #[test]
    fn if_else_blocks() {
        let program = parse(r#"if (x > 0) { print("pos"); } else { print("neg"); }"#);
        assert_eq!(program.statements.len(), 1);
        assert!(matches!(program.statements[0].node, Stmt::If(_, _, Some(_))));
    }

    #[test]
    fn while_loop() {
        let program = parse("while (i < 3) { print(i); i = i + 1; }");
        match &program.statements[0].node {
            Stmt::While(_, body) => assert_eq!(body.len(), 2),
            other => panic!("expected a while loop, got {other:?}"),
        }
    }

    #[test]
    fn operator_precedence() {
        let program = parse("x = 1 + 2 * 3;");
        match &program.statements[0].node {
            Stmt::Assign(_, Expr::Binary(BinOp::Add, _, rhs)) => {
                assert!(matches!(**rhs, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("expected 1 + (2 * 3), got {other:?}"),
        }
    }
}
