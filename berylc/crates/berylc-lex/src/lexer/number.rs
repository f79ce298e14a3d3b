//! Numeric literal scanning.
//!
//! Integers carry their written radix so the AST can reproduce the
//! literal; underscores group digits in any base.

use crate::cursor::is_ident_continue;
use crate::token::Token;

use super::Lexer;

impl<'a> Lexer<'a> {
    pub(crate) fn lex_number(&mut self) {
        if self.cursor.current() == '0' {
            match self.cursor.peek(1) {
                'x' | 'X' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.lex_radix_literal(16);
                    return;
                }
                'b' | 'B' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.lex_radix_literal(2);
                    return;
                }
                'o' | 'O' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.lex_radix_literal(8);
                    return;
                }
                c if c.is_ascii_digit() || c == '_' => {
                    // leading zero means octal
                    self.cursor.advance();
                    self.lex_radix_literal(8);
                    return;
                }
                _ => {}
            }
        }
        self.lex_decimal();
    }

    fn lex_radix_literal(&mut self, base: u8) {
        let digits = self
            .cursor
            .take_while(|c| c.is_ascii_alphanumeric() || c == '_')
            .replace('_', "");
        match i64::from_str_radix(&digits, base as u32) {
            Ok(value) => self.push(Token::Int { value, base }),
            Err(_) => {
                self.error(format!("malformed base-{base} literal"));
                self.push(Token::Int { value: 0, base });
            }
        }
    }

    fn lex_decimal(&mut self) {
        let mut text = self
            .cursor
            .take_while(|c| c.is_ascii_digit() || c == '_')
            .to_string();
        let mut is_float = false;

        // a fraction only when a digit follows the dot: `1.2` yes, `1.times`
        // and `1..2` no
        if self.cursor.current() == '.' && self.cursor.peek(1).is_ascii_digit() {
            is_float = true;
            text.push(self.cursor.advance());
            text.push_str(self.cursor.take_while(|c| c.is_ascii_digit() || c == '_'));
        }
        if matches!(self.cursor.current(), 'e' | 'E') {
            let after_sign = if matches!(self.cursor.peek(1), '+' | '-') {
                self.cursor.peek(2)
            } else {
                self.cursor.peek(1)
            };
            if after_sign.is_ascii_digit() {
                is_float = true;
                text.push(self.cursor.advance());
                if matches!(self.cursor.current(), '+' | '-') {
                    text.push(self.cursor.advance());
                }
                text.push_str(self.cursor.take_while(|c| c.is_ascii_digit() || c == '_'));
            }
        }

        if is_ident_continue(self.cursor.current()) {
            self.error("trailing characters in number");
            self.cursor.take_while(is_ident_continue);
        }

        let text = text.replace('_', "");
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => self.push(Token::Float(value)),
                Err(_) => {
                    self.error("malformed float literal");
                    self.push(Token::Float(0.0));
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push(Token::Int { value, base: 10 }),
                Err(_) => {
                    // integer too large for the machine word: read as float
                    match text.parse::<f64>() {
                        Ok(value) => self.push(Token::Float(value)),
                        Err(_) => {
                            self.error("malformed numeric literal");
                            self.push(Token::Int { value: 0, base: 10 });
                        }
                    }
                }
            }
        }
    }
}
