//! The configuration script DSL understood by [`crate::compiler::DslCompiler`]
//!
//! ```text
//! plugins {
//!     id 'base'
//!     id 'org.example.lint' version '1.2' apply false
//! }
//!
//! println 'configuring'
//! apply plugin: 'java'
//! ext.group = 'org.example'
//! ```
pub mod lexer;
pub mod parser;

pub use lexer::{tokenize, LexError, Token, TokenKind};
pub use parser::{parse, ParseError, PluginSpec, Statement, Stmt};
