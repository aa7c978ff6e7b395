//! Hand-rolled char-by-char lexer over the grammar's small token set.

use crate::error::CompileError;
use crate::token::{Token, TokenWithSpan};

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.current();
        if let Some(ch) = c {
            self.pos += 1;
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c.is_whitespace() {
                self.advance();
            } else if c == '#' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !is_float {
                if let Some(next) = self.peek() {
                    if next.is_ascii_digit() {
                        is_float = true;
                        num_str.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        if is_float {
            Token::Float(num_str.parse().unwrap_or(0.0))
        } else {
            Token::Integer(num_str.parse().unwrap_or(0))
        }
    }

    fn read_string(&mut self) -> Result<Token, CompileError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(CompileError::LexError(format!(
                        "unterminated string at line {}",
                        self.line
                    )))
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some(other) => s.push(other),
                        None => {
                            return Err(CompileError::LexError(
                                "unterminated escape sequence".to_string(),
                            ))
                        }
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::String(s))
    }

    fn read_ident(&mut self) -> Token {
        let mut s = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::is_keyword(&s).unwrap_or(Token::Ident(s))
    }

    fn next_token(&mut self) -> Result<TokenWithSpan, CompileError> {
        self.skip_whitespace();
        let line = self.line;
        let column = self.column;

        let Some(c) = self.current() else {
            return Ok(TokenWithSpan { token: Token::Eof, line, column });
        };

        let token = if c.is_ascii_digit() {
            self.read_number()
        } else if c == '"' {
            self.read_string()?
        } else if c.is_alphabetic() || c == '_' {
            self.read_ident()
        } else {
            match c {
                '+' => { self.advance(); Token::Plus }
                '-' => { self.advance(); Token::Minus }
                '*' => { self.advance(); Token::Star }
                '/' => { self.advance(); Token::Slash }
                '%' => { self.advance(); Token::Percent }
                '(' => { self.advance(); Token::LParen }
                ')' => { self.advance(); Token::RParen }
                '{' => { self.advance(); Token::LBrace }
                '}' => { self.advance(); Token::RBrace }
                ',' => { self.advance(); Token::Comma }
                ';' => { self.advance(); Token::Semicolon }
                '=' => {
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        Token::Eq
                    } else {
                        Token::Assign
                    }
                }
                '!' => {
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        Token::Ne
                    } else {
                        Token::Not
                    }
                }
                '<' => {
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                '&' => {
                    self.advance();
                    if self.current() == Some('&') {
                        self.advance();
                        Token::And
                    } else {
                        return Err(CompileError::LexError(format!(
                            "unexpected character '&' at line {line}, column {column}"
                        )));
                    }
                }
                '|' => {
                    self.advance();
                    if self.current() == Some('|') {
                        self.advance();
                        Token::Or
                    } else {
                        return Err(CompileError::LexError(format!(
                            "unexpected character '|' at line {line}, column {column}"
                        )));
                    }
                }
                other => {
                    return Err(CompileError::LexError(format!(
                        "unexpected character '{other}' at line {line}, column {column}"
                    )))
                }
            }
        };

        Ok(TokenWithSpan { token, line, column })
    }

    pub fn tokenize(&mut self) -> Result<Vec<TokenWithSpan>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.token == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn assignment_and_arithmetic() {
        assert_eq!(
            kinds("x = 10 + 20;"),
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::Integer(10),
                Token::Plus,
                Token::Integer(20),
                Token::Semicolon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comparison_and_logical_operators() {
        assert_eq!(
            kinds("a <= b && c != d"),
            vec![
                Token::Ident("a".into()),
                Token::Le,
                Token::Ident("b".into()),
                Token::And,
                Token::Ident("c".into()),
                Token::Ne,
                Token::Ident("d".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn string_with_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![Token::String("a\nb".to_string()), Token::Eof]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("# comment\nx"), vec![Token::Ident("x".into()), Token::Eof]);
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }
}
