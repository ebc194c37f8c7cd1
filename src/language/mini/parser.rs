//! Mini syntax tree and parser
//!
//! ```text
//! program   := statement*
//! statement := "print" expr | "eprint" expr
//!            | "set" NAME "=" expr | "global" NAME "=" expr
//!            | "include" expr
//!            | "def" NAME "{" statement* "}"
//!            | "call" NAME ( "(" expr ("," expr)* ")" )?
//!            | "return" expr
//! expr      := term ("+" term)*
//! term      := STRING | INTEGER | NAME | "$" DIGITS | "(" expr ")"
//! ```
//!
//! Statements need no separator; `;` and `#` comments are skipped anywhere a
//! statement may start.

use std::sync::Arc;
use thiserror::Error;

/// A Mini expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// String literal
    Text(String),
    /// Integer literal
    Integer(i64),
    /// Context attribute or global scope value
    Variable(String),
    /// Positional entry point argument
    Argument(usize),
    /// Numeric addition or string concatenation
    Add(Box<Expr>, Box<Expr>),
}

/// A Mini statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Write a value to the output sink
    Print(Expr),
    /// Write a value to the error sink
    Eprint(Expr),
    /// Set a context attribute
    Set(String, Expr),
    /// Set a global scope value
    Global(String, Expr),
    /// Include the document named by the value
    Include(Expr),
    /// Define an entry point
    Def(String, Arc<Vec<Statement>>),
    /// Invoke an entry point
    Call(String, Vec<Expr>),
    /// Leave the current entry point with a value
    Return(Expr),
}

/// A Mini program failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}")]
pub struct SyntaxError {
    /// 1-based line within the program text
    pub line: usize,
    /// 1-based column within the line
    pub column: usize,
    /// What went wrong
    pub message: String,
}

const KEYWORDS: &[&str] = &["print", "eprint", "set", "global", "include", "def", "call", "return"];

/// Parse program text into statements
pub fn parse(source: &str) -> Result<Vec<Statement>, SyntaxError> {
    Parser::new(source).parse_block(false)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
    line: usize,
    line_start: usize,
}

type ParseResult<T> = Result<T, SyntaxError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.src[self.index..].chars().next()?;
        self.index += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.line_start = self.index;
        }
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while self.current().is_some_and(|ch| ch.is_ascii_whitespace()) {
            self.next_char();
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.skip_ws();
            match self.current() {
                Some(b';') => {
                    self.next_char();
                }
                Some(b'#') => {
                    while let Some(ch) = self.next_char() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn expect(&mut self, expected: u8) -> ParseResult<()> {
        self.skip_ws();
        if self.current() == Some(expected) {
            self.next_char();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected as char)))
        }
    }

    fn parse_block(&mut self, braced: bool) -> ParseResult<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            self.skip_trivia();
            match self.current() {
                None if braced => return Err(self.error("unterminated block")),
                None => break,
                Some(b'}') if braced => {
                    self.next_char();
                    break;
                }
                Some(b'}') => return Err(self.error("unexpected '}'")),
                Some(_) => statements.push(self.parse_statement()?),
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let keyword = self
            .parse_identifier()
            .ok_or_else(|| self.error("expected statement"))?;
        match keyword {
            "print" => Ok(Statement::Print(self.parse_expr()?)),
            "eprint" => Ok(Statement::Eprint(self.parse_expr()?)),
            "include" => Ok(Statement::Include(self.parse_expr()?)),
            "return" => Ok(Statement::Return(self.parse_expr()?)),
            "set" | "global" => {
                let name = self.parse_name()?;
                self.expect(b'=')?;
                let value = self.parse_expr()?;
                if keyword == "set" {
                    Ok(Statement::Set(name, value))
                } else {
                    Ok(Statement::Global(name, value))
                }
            }
            "def" => {
                let name = self.parse_name()?;
                self.expect(b'{')?;
                let body = self.parse_block(true)?;
                Ok(Statement::Def(name, Arc::new(body)))
            }
            "call" => {
                let name = self.parse_name()?;
                self.skip_ws();
                let mut arguments = Vec::new();
                if self.current() == Some(b'(') {
                    self.next_char();
                    self.skip_ws();
                    if self.current() == Some(b')') {
                        self.next_char();
                    } else {
                        loop {
                            arguments.push(self.parse_expr()?);
                            self.skip_ws();
                            match self.current() {
                                Some(b',') => {
                                    self.next_char();
                                }
                                Some(b')') => {
                                    self.next_char();
                                    break;
                                }
                                _ => return Err(self.error("expected ',' or ')'")),
                            }
                        }
                    }
                }
                Ok(Statement::Call(name, arguments))
            }
            other => Err(self.error(format!("unknown statement '{}'", other))),
        }
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            self.skip_ws();
            if self.current() != Some(b'+') {
                return Ok(expr);
            }
            self.next_char();
            let rhs = self.parse_term()?;
            expr = Expr::Add(Box::new(expr), Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        self.skip_ws();
        match self.current() {
            None => Err(self.error("unexpected end of input")),
            Some(b'"') => self.parse_string(),
            Some(b'0'..=b'9' | b'-') => self.parse_integer(),
            Some(b'$') => {
                self.next_char();
                let start = self.index;
                while self.current().is_some_and(|ch| ch.is_ascii_digit()) {
                    self.next_char();
                }
                self.src[start..self.index]
                    .parse()
                    .map(Expr::Argument)
                    .map_err(|_| self.error("expected argument index after '$'"))
            }
            Some(b'(') => {
                self.next_char();
                let expr = self.parse_expr()?;
                self.expect(b')')?;
                Ok(expr)
            }
            Some(_) => {
                let start = (self.index, self.line, self.line_start);
                match self.parse_identifier() {
                    Some(name) if KEYWORDS.contains(&name) => {
                        (self.index, self.line, self.line_start) = start;
                        Err(self.error(format!("unexpected keyword '{}'", name)))
                    }
                    Some(name) => Ok(Expr::Variable(name.to_string())),
                    None => Err(self.error("unexpected character")),
                }
            }
        }
    }

    fn parse_string(&mut self) -> ParseResult<Expr> {
        // opening quote
        self.next_char();
        let mut buf = String::new();
        while let Some(ch) = self.next_char() {
            match ch {
                '"' => return Ok(Expr::Text(buf)),
                '\\' => {
                    let escaped = self
                        .next_char()
                        .ok_or_else(|| self.error("incomplete escape"))?;
                    buf.push(match escaped {
                        '"' => '"',
                        '\\' => '\\',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => return Err(self.error(format!("unknown escape: \\{}", other))),
                    });
                }
                _ => buf.push(ch),
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn parse_integer(&mut self) -> ParseResult<Expr> {
        let start = self.index;
        if self.current() == Some(b'-') {
            self.next_char();
        }
        while self.current().is_some_and(|ch| ch.is_ascii_digit()) {
            self.next_char();
        }
        self.src[start..self.index]
            .parse()
            .map(Expr::Integer)
            .map_err(|_| self.error("invalid integer literal"))
    }

    fn parse_identifier(&mut self) -> Option<&'a str> {
        let start = self.index;
        match self.current() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == b'_' => {}
            _ => return None,
        }
        while self
            .current()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.')
        {
            self.next_char();
        }
        Some(&self.src[start..self.index])
    }

    fn parse_name(&mut self) -> ParseResult<String> {
        self.skip_ws();
        match self.parse_identifier() {
            Some(name) if !KEYWORDS.contains(&name) => Ok(name.to_string()),
            _ => Err(self.error("expected name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line: self.line,
            column: self.src[self.line_start..self.index].chars().count() + 1,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Expr {
        Expr::Text(value.to_string())
    }

    #[test]
    fn statements_need_no_separators() {
        let statements = parse("print 1print \"tail\";print 2").unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::Print(Expr::Integer(1)),
                Statement::Print(text("tail")),
                Statement::Print(Expr::Integer(2)),
            ]
        );
    }

    #[test]
    fn parses_assignments_and_addition() {
        let statements = parse("set greeting = \"hi \" + name # comment\nglobal hits = hits + 1").unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::Set(
                    "greeting".into(),
                    Expr::Add(Box::new(text("hi ")), Box::new(Expr::Variable("name".into())))
                ),
                Statement::Global(
                    "hits".into(),
                    Expr::Add(
                        Box::new(Expr::Variable("hits".into())),
                        Box::new(Expr::Integer(1))
                    )
                ),
            ]
        );
    }

    #[test]
    fn parses_definitions_and_calls() {
        let statements = parse("def greet { print \"hi \" + $0; return 1 }\ncall greet(\"you\", -2)").unwrap();
        assert_eq!(
            statements[0],
            Statement::Def(
                "greet".into(),
                Arc::new(vec![
                    Statement::Print(Expr::Add(
                        Box::new(text("hi ")),
                        Box::new(Expr::Argument(0))
                    )),
                    Statement::Return(Expr::Integer(1)),
                ])
            )
        );
        assert_eq!(
            statements[1],
            Statement::Call("greet".into(), vec![text("you"), Expr::Integer(-2)])
        );
    }

    #[test]
    fn string_escapes_and_unicode() {
        let statements = parse(r#"print "a\"b\n✓""#).unwrap();
        assert_eq!(statements, vec![Statement::Print(text("a\"b\n✓"))]);
    }

    #[test]
    fn errors_report_line_and_column() {
        let err = parse("print 1\n  bogus 2").unwrap_err();
        assert_eq!((err.line, err.column), (2, 8));
        assert!(err.message.contains("bogus"));

        let err = parse("def f { print 1").unwrap_err();
        assert!(err.message.contains("unterminated block"));

        let err = parse("print print").unwrap_err();
        assert_eq!((err.line, err.column), (1, 7));
    }
}
