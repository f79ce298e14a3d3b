//! berylc-lex - Lexer
//!
//! Transforms Beryl source text into a token stream. The language is
//! line-oriented, so the lexer carries more state than a typical
//! tokenizer:
//!
//! - an expression state ([`lexer::LexState`]) deciding whether `/` starts a
//!   regexp or divides, whether `<<` opens a heredoc or shifts, whether a
//!   newline terminates a statement or continues one;
//! - a bracket depth so newlines inside `(...)`/`[...]` stay insignificant;
//! - a heredoc queue: identifiers seen at `<<` are queued and their bodies
//!   are consumed starting at the next newline, then spliced back into the
//!   token stream at the marker position.
//!
//! The lexer never fails hard; problems are reported into the shared
//! [`Diagnostics`](berylc_util::Diagnostics) sink and an best-effort token
//! is produced so the parser can continue.

pub mod cursor;
pub mod lexer;
pub mod token;

pub use cursor::Cursor;
pub use lexer::{tokenize, LexState, Lexer};
pub use token::{StrPart, Token, TokenWithSpan};
