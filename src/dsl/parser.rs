/// Statement parser for the script DSL
use thiserror::Error;

use super::lexer::{Token, TokenKind};

/// One entry of a plugins block: `id 'x' [version 'v'] [apply true|false]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub id: String,
    pub version: Option<String>,
    pub apply: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    PluginsBlock(Vec<PluginSpec>),
    Println(String),
    ApplyPlugin(String),
    Assign { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub line: usize,
    pub statement: Statement,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

pub fn parse(tokens: &[Token]) -> Result<Vec<Stmt>, ParseError> {
    Parser { tokens, pos: 0 }.parse_program()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            let Some(token) = self.next() else {
                return Ok(statements);
            };
            let line = token.line;
            let statement = match &token.kind {
                TokenKind::Ident(name) if name == "plugins" => self.plugins_block(line)?,
                TokenKind::Ident(name) if name == "println" => {
                    Statement::Println(self.expect_string("println")?)
                }
                TokenKind::Ident(name) if name == "apply" => {
                    self.expect_ident("plugin")?;
                    self.expect(TokenKind::Colon, "':'")?;
                    Statement::ApplyPlugin(self.expect_string("apply plugin:")?)
                }
                TokenKind::Ident(name) => match name.strip_prefix("ext.") {
                    Some(key) if !key.is_empty() => {
                        self.expect(TokenKind::Equals, "'='")?;
                        Statement::Assign {
                            key: key.to_string(),
                            value: self.expect_string(name)?,
                        }
                    }
                    _ => return Err(error(line, format!("unsupported statement '{}'", name))),
                },
                TokenKind::RBrace => return Err(error(line, "unexpected '}'")),
                other => return Err(error(line, format!("unexpected {}", describe(other)))),
            };
            self.end_of_statement(false)?;
            statements.push(Stmt { line, statement });
        }
    }

    fn plugins_block(&mut self, line: usize) -> Result<Statement, ParseError> {
        self.skip_newlines();
        self.expect(TokenKind::LBrace, "'{' after plugins")?;

        let mut specs = Vec::new();
        loop {
            self.skip_terminators();
            let Some(token) = self.next() else {
                return Err(error(line, "unterminated plugins block"));
            };
            if token.kind == TokenKind::RBrace {
                return Ok(Statement::PluginsBlock(specs));
            }
            if !token.is_ident("id") {
                return Err(error(
                    token.line,
                    "only 'id' declarations are allowed inside plugins {}",
                ));
            }
            let spec_line = token.line;
            let id = self.expect_string("id")?;
            let mut version = None;
            let mut apply = true;

            if self.peek().is_some_and(|t| t.is_ident("version")) {
                self.pos += 1;
                version = Some(self.expect_string("version")?);
            }
            if self.peek().is_some_and(|t| t.is_ident("apply")) {
                self.pos += 1;
                apply = match self.next().map(|t| &t.kind) {
                    Some(TokenKind::Ident(value)) if value == "true" => true,
                    Some(TokenKind::Ident(value)) if value == "false" => false,
                    _ => return Err(error(spec_line, "expected true or false after apply")),
                };
            }
            self.end_of_statement(true)?;
            specs.push(PluginSpec {
                id,
                version,
                apply,
                line: spec_line,
            });
        }
    }

    fn end_of_statement(&mut self, in_block: bool) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) if token.is_terminator() => {
                self.pos += 1;
                Ok(())
            }
            Some(token) if in_block && token.kind == TokenKind::RBrace => Ok(()),
            Some(token) => Err(error(
                token.line,
                format!("unexpected {} at end of statement", describe(&token.kind)),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(error(token.line, format!("expected {}", what))),
            None => Err(error(self.last_line(), format!("expected {}", what))),
        }
    }

    fn expect_ident(&mut self, name: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(token) if token.is_ident(name) => Ok(()),
            Some(token) => Err(error(token.line, format!("expected '{}'", name))),
            None => Err(error(self.last_line(), format!("expected '{}'", name))),
        }
    }

    fn expect_string(&mut self, after: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Str(value),
                ..
            }) => Ok(value.clone()),
            Some(token) => Err(error(
                token.line,
                format!("expected a string after {}", after),
            )),
            None => Err(error(
                self.last_line(),
                format!("expected a string after {}", after),
            )),
        }
    }

    fn skip_terminators(&mut self) {
        while self.peek().is_some_and(Token::is_terminator) {
            self.pos += 1;
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().is_some_and(Token::is_newline) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|t| t.line).unwrap_or(1)
    }
}

fn error(line: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        line,
        message: message.into(),
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::LBrace => "'{'".to_string(),
        TokenKind::RBrace => "'}'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Equals => "'='".to_string(),
        TokenKind::Semicolon => "';'".to_string(),
        TokenKind::Newline => "end of line".to_string(),
    }
}
