/// Tokenizer for the script DSL
///
/// Shared by the splitter and the compiler so both agree on where a top-level
/// plugins block starts and ends.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    LBrace,
    RBrace,
    Colon,
    Equals,
    Semicolon,
    Newline,
}

/// A token with its 1-based line and its byte span in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(ident) if ident == name)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.kind, TokenKind::Newline | TokenKind::Semicolon)
    }

    pub fn is_newline(&self) -> bool {
        self.kind == TokenKind::Newline
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut line = 1;

    while let Some((start, c)) = chars.next() {
        let single = move |kind: TokenKind| Token {
            kind,
            line,
            start,
            end: start + c.len_utf8(),
        };

        match c {
            ' ' | '\t' | '\r' => {}
            '\n' => {
                tokens.push(single(TokenKind::Newline));
                line += 1;
            }
            '{' => tokens.push(single(TokenKind::LBrace)),
            '}' => tokens.push(single(TokenKind::RBrace)),
            ':' => tokens.push(single(TokenKind::Colon)),
            '=' => tokens.push(single(TokenKind::Equals)),
            ';' => tokens.push(single(TokenKind::Semicolon)),
            '/' => match chars.peek() {
                Some((_, '/')) => {
                    while let Some((_, next)) = chars.peek() {
                        if *next == '\n' {
                            break;
                        }
                        chars.next();
                    }
                }
                Some((_, '*')) => {
                    chars.next();
                    let opened_at = line;
                    let mut closed = false;
                    while let Some((_, next)) = chars.next() {
                        match next {
                            '\n' => line += 1,
                            '*' if matches!(chars.peek(), Some((_, '/'))) => {
                                chars.next();
                                closed = true;
                                break;
                            }
                            _ => {}
                        }
                    }
                    if !closed {
                        return Err(LexError {
                            line: opened_at,
                            message: "unterminated block comment".to_string(),
                        });
                    }
                }
                _ => {
                    return Err(LexError {
                        line,
                        message: "unexpected character '/'".to_string(),
                    })
                }
            },
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                let mut end = None;
                while let Some((index, next)) = chars.next() {
                    match next {
                        '\n' => break,
                        '\\' => {
                            let escaped = match chars.next() {
                                Some((_, 'n')) => '\n',
                                Some((_, 't')) => '\t',
                                Some((_, other @ ('\\' | '\'' | '"'))) => other,
                                Some((_, other)) => {
                                    return Err(LexError {
                                        line,
                                        message: format!("unknown escape sequence '\\{}'", other),
                                    })
                                }
                                None => break,
                            };
                            value.push(escaped);
                        }
                        _ if next == quote => {
                            end = Some(index + next.len_utf8());
                            break;
                        }
                        _ => value.push(next),
                    }
                }
                let end = end.ok_or_else(|| LexError {
                    line,
                    message: "unterminated string literal".to_string(),
                })?;
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    line,
                    start,
                    end,
                });
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                let mut end = start + c.len_utf8();
                while let Some((index, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' || *next == '.' {
                        ident.push(*next);
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(ident),
                    line,
                    start,
                    end,
                });
            }
            other => {
                return Err(LexError {
                    line,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
    }

    Ok(tokens)
}
