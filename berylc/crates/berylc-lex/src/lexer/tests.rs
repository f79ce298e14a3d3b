use berylc_util::Diagnostics;

use crate::token::{StrPart, Token};

fn lex(source: &str) -> Vec<Token> {
    let mut diags = Diagnostics::new();
    let tokens = super::tokenize(source, &mut diags);
    assert!(
        !diags.has_errors(),
        "unexpected lex errors for {source:?}: {:?}",
        diags.iter().collect::<Vec<_>>()
    );
    tokens.into_iter().map(|t| t.token).collect()
}

fn lex_lossy(source: &str) -> (Vec<Token>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let tokens = super::tokenize(source, &mut diags);
    (tokens.into_iter().map(|t| t.token).collect(), diags)
}

#[test]
fn test_simple_expression() {
    assert_eq!(
        lex("a = 1 + 2"),
        vec![
            Token::Ident("a".into()),
            Token::Assign,
            Token::Int { value: 1, base: 10 },
            Token::Plus,
            Token::Int { value: 2, base: 10 },
            Token::Eof,
        ]
    );
}

#[test]
fn test_keywords_and_idents() {
    assert_eq!(
        lex("def foo end"),
        vec![
            Token::KwDef,
            Token::Ident("foo".into()),
            Token::KwEnd,
            Token::Eof
        ]
    );
}

#[test]
fn test_method_suffix_names() {
    assert_eq!(
        lex("alive? map!"),
        vec![
            Token::Ident("alive?".into()),
            Token::Ident("map!".into()),
            Token::Eof
        ]
    );
}

#[test]
fn test_numbers_in_bases() {
    assert_eq!(
        lex("0x1f 0b101 0o17 017 1_000_000"),
        vec![
            Token::Int { value: 31, base: 16 },
            Token::Int { value: 5, base: 2 },
            Token::Int { value: 15, base: 8 },
            Token::Int { value: 15, base: 8 },
            Token::Int {
                value: 1_000_000,
                base: 10
            },
            Token::Eof,
        ]
    );
}

#[test]
fn test_floats() {
    assert_eq!(
        lex("1.5 2e3 1.25e-2"),
        vec![
            Token::Float(1.5),
            Token::Float(2000.0),
            Token::Float(0.0125),
            Token::Eof
        ]
    );
}

#[test]
fn test_int_dot_method_is_not_float() {
    assert_eq!(
        lex("3.times"),
        vec![
            Token::Int { value: 3, base: 10 },
            Token::Dot,
            Token::Ident("times".into()),
            Token::Eof,
        ]
    );
}

#[test]
fn test_range_after_int() {
    assert_eq!(
        lex("1..5"),
        vec![
            Token::Int { value: 1, base: 10 },
            Token::DotDot,
            Token::Int { value: 5, base: 10 },
            Token::Eof,
        ]
    );
}

#[test]
fn test_string_escapes() {
    assert_eq!(
        lex(r#""a\tb\n""#),
        vec![Token::Str(vec![StrPart::Lit("a\tb\n".into())]), Token::Eof]
    );
    assert_eq!(
        lex(r"'it\'s'"),
        vec![Token::RawStr("it's".into()), Token::Eof]
    );
}

#[test]
fn test_string_interpolation() {
    assert_eq!(
        lex(r#""a#{1 + 2}b""#),
        vec![
            Token::Str(vec![
                StrPart::Lit("a".into()),
                StrPart::Interp("1 + 2".into()),
                StrPart::Lit("b".into()),
            ]),
            Token::Eof
        ]
    );
}

#[test]
fn test_nested_interpolation_braces() {
    assert_eq!(
        lex(r##""#{ {1 => 2}.size }""##),
        vec![
            Token::Str(vec![StrPart::Interp(" {1 => 2}.size ".into())]),
            Token::Eof
        ]
    );
}

#[test]
fn test_symbols() {
    assert_eq!(lex(":foo")[0], Token::Symbol("foo".into()));
    assert_eq!(lex(":+")[0], Token::Symbol("+".into()));
    assert_eq!(lex(":[]=")[0], Token::Symbol("[]=".into()));
    assert_eq!(lex(":\"quoted\"")[0], Token::Symbol("quoted".into()));
    assert_eq!(lex(":x=")[0], Token::Symbol("x=".into()));
    assert_eq!(
        lex("attr_accessor :name, :age"),
        vec![
            Token::Ident("attr_accessor".into()),
            Token::Symbol("name".into()),
            Token::Comma,
            Token::Symbol("age".into()),
            Token::Eof,
        ]
    );
}

#[test]
fn test_ternary_colon_not_symbol() {
    let tokens = lex("x ? 1 : 2");
    assert!(tokens.contains(&Token::Question));
    assert!(tokens.contains(&Token::Colon));
}

#[test]
fn test_char_literal() {
    assert_eq!(
        lex("?a"),
        vec![Token::RawStr("a".into()), Token::Eof]
    );
}

#[test]
fn test_word_lists() {
    assert_eq!(
        lex("%w[foo bar baz]"),
        vec![
            Token::Words(vec!["foo".into(), "bar".into(), "baz".into()]),
            Token::Eof
        ]
    );
    assert_eq!(
        lex("%i(a b)"),
        vec![Token::Symbols(vec!["a".into(), "b".into()]), Token::Eof]
    );
}

#[test]
fn test_newline_significance() {
    // an operator keeps the line open
    assert_eq!(
        lex("a +\nb"),
        vec![
            Token::Ident("a".into()),
            Token::Plus,
            Token::Ident("b".into()),
            Token::Eof,
        ]
    );
    // a finished expression terminates at the newline
    assert_eq!(
        lex("a\nb"),
        vec![
            Token::Ident("a".into()),
            Token::Newline,
            Token::Ident("b".into()),
            Token::Eof,
        ]
    );
}

#[test]
fn test_newline_in_parens_insignificant() {
    let tokens = lex("foo(1,\n2)");
    assert!(!tokens.contains(&Token::Newline));
}

#[test]
fn test_regexp_vs_division() {
    assert_eq!(
        lex("a / b"),
        vec![
            Token::Ident("a".into()),
            Token::Slash,
            Token::Ident("b".into()),
            Token::Eof,
        ]
    );
    let tokens = lex("x = /ab+c/i");
    assert_eq!(
        tokens[2],
        Token::Regexp {
            parts: vec![StrPart::Lit("ab+c".into())],
            flags: "i".into()
        }
    );
}

#[test]
fn test_op_assign() {
    assert_eq!(
        lex("a += 1"),
        vec![
            Token::Ident("a".into()),
            Token::OpAssign("+".into()),
            Token::Int { value: 1, base: 10 },
            Token::Eof,
        ]
    );
    assert_eq!(lex("a ||= 1")[1], Token::OpAssign("||".into()));
    assert_eq!(lex("a <<= 1")[1], Token::OpAssign("<<".into()));
}

#[test]
fn test_heredoc_plain() {
    let tokens = lex("s = <<EOS\nline one\nline two\nEOS\nt");
    assert_eq!(
        tokens[2],
        Token::Str(vec![StrPart::Lit("line one\nline two\n".into())])
    );
    // the heredoc token sits at the marker; lexing continues after the body
    assert_eq!(tokens[3], Token::Newline);
    assert_eq!(tokens[4], Token::Ident("t".into()));
}

#[test]
fn test_heredoc_after_method_arg() {
    let tokens = lex("puts <<EOS\nhi\nEOS\n");
    assert_eq!(tokens[0], Token::Ident("puts".into()));
    assert_eq!(tokens[1], Token::Str(vec![StrPart::Lit("hi\n".into())]));
}

#[test]
fn test_heredoc_single_quoted_no_interp() {
    let tokens = lex("s = <<'EOS'\na#{b}\nEOS\n");
    assert_eq!(tokens[2], Token::RawStr("a#{b}\n".into()));
}

#[test]
fn test_heredoc_indented_terminator() {
    let tokens = lex("s = <<-EOS\nbody\n  EOS\n");
    assert_eq!(tokens[2], Token::Str(vec![StrPart::Lit("body\n".into())]));
}

#[test]
fn test_heredoc_with_interpolation() {
    let tokens = lex("s = <<EOS\na#{x}b\nEOS\n");
    assert_eq!(
        tokens[2],
        Token::Str(vec![
            StrPart::Lit("a".into()),
            StrPart::Interp("x".into()),
            StrPart::Lit("b\n".into()),
        ])
    );
}

#[test]
fn test_lshift_still_works() {
    assert_eq!(
        lex("a << b"),
        vec![
            Token::Ident("a".into()),
            Token::LShift,
            Token::Ident("b".into()),
            Token::Eof,
        ]
    );
}

#[test]
fn test_variables() {
    assert_eq!(
        lex("@a @@b $c $1 $&"),
        vec![
            Token::IVar("a".into()),
            Token::CVar("b".into()),
            Token::GVar("c".into()),
            Token::NthRef(1),
            Token::BackRef('&'),
            Token::Eof,
        ]
    );
}

#[test]
fn test_operator_method_definition() {
    assert_eq!(
        lex("def +(other) end"),
        vec![
            Token::KwDef,
            Token::Ident("+".into()),
            Token::LParen,
            Token::Ident("other".into()),
            Token::RParen,
            Token::KwEnd,
            Token::Eof,
        ]
    );
    assert_eq!(lex("def []=(k, v) end")[1], Token::Ident("[]=".into()));
}

#[test]
fn test_keyword_as_method_name_after_dot() {
    assert_eq!(
        lex("x.class"),
        vec![
            Token::Ident("x".into()),
            Token::Dot,
            Token::Ident("class".into()),
            Token::Eof,
        ]
    );
}

#[test]
fn test_comments_ignored() {
    assert_eq!(
        lex("a # trailing\nb"),
        vec![
            Token::Ident("a".into()),
            Token::Newline,
            Token::Ident("b".into()),
            Token::Eof,
        ]
    );
    assert_eq!(
        lex("=begin\nanything\n=end\na"),
        vec![Token::Ident("a".into()), Token::Eof]
    );
}

#[test]
fn test_data_section_cuts_input() {
    assert_eq!(
        lex("a\n__END__\nthis is not code"),
        vec![Token::Ident("a".into()), Token::Newline, Token::Eof]
    );
}

#[test]
fn test_unterminated_string_reported() {
    let (_, diags) = lex_lossy("\"abc");
    assert!(diags.has_errors());
}

#[test]
fn test_unterminated_heredoc_reported() {
    let (_, diags) = lex_lossy("s = <<EOS\nbody");
    assert!(diags.has_errors());
}

#[test]
fn test_arrow_and_rocket() {
    assert_eq!(lex("->"), vec![Token::Arrow, Token::Eof]);
    assert_eq!(
        lex("{1 => 2}")[2],
        Token::FatArrow
    );
}

#[test]
fn test_spans_track_lines() {
    let mut diags = Diagnostics::new();
    let tokens = super::tokenize("a\nbb", &mut diags);
    assert_eq!(tokens[0].span.line, 1);
    let last = &tokens[tokens.len() - 2];
    assert_eq!(last.span.line, 2);
    assert_eq!(last.span.column, 1);
}
