//! The lexer must survive arbitrary input: errors go to the diagnostics
//! sink, never panics, and the stream always terminates.

use berylc_lex::{tokenize, Token};
use berylc_util::Diagnostics;
use proptest::prelude::*;

proptest! {
    #[test]
    fn lexer_never_panics(input in "\\PC*") {
        let mut diags = Diagnostics::new();
        let tokens = tokenize(&input, &mut diags);
        prop_assert!(matches!(tokens.last().map(|t| &t.token), Some(Token::Eof)));
    }

    #[test]
    fn lexer_handles_ascii_soup(input in "[-+*/%=<>!&|^~?:;.,(){}\\[\\]'\"#@$ \\n\\t0-9a-zA-Z_]*") {
        let mut diags = Diagnostics::new();
        let tokens = tokenize(&input, &mut diags);
        prop_assert!(!tokens.is_empty());
    }
}

#[test]
fn lexer_survives_lone_escapes() {
    for input in ["\\", "\"\\", "'\\", "<<EOS", ":", "?", "$", "@", "0x", "1e"] {
        let mut diags = Diagnostics::new();
        let tokens = tokenize(input, &mut diags);
        assert!(matches!(tokens.last().map(|t| &t.token), Some(Token::Eof)));
    }
}
