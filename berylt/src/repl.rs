//! Interactive session.
//!
//! Reads a line, asks the parser whether the input so far is a complete
//! construct; while it is not (open `def`/`if`/string/heredoc), keeps
//! accumulating lines. A complete chunk is evaluated and its value (or
//! the exception) printed. `quit`/`exit` at the top level ends the
//! session.

use std::io::{self, BufRead, Write};

use berylc_util::Diagnostics;
use bvm::{BerylError, State};

use crate::error::Result;

pub fn run_repl() -> Result<()> {
    let stdin = io::stdin();
    let mut state = State::new();
    let mut buffer = String::new();
    let mut line_no = 1usize;

    print_banner();
    prompt(false, line_no);
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if buffer.is_empty() {
            let word = line.trim();
            if word == "quit" || word == "exit" {
                break;
            }
        }
        buffer.push_str(&line);
        buffer.push('\n');

        if input_open(&buffer) {
            prompt(true, line_no);
            continue;
        }

        let chunk = std::mem::take(&mut buffer);
        line_no += chunk.lines().count();
        evaluate_chunk(&mut state, &chunk);
        prompt(false, line_no);
    }
    Ok(())
}

fn evaluate_chunk(state: &mut State, chunk: &str) {
    match state.load_string(chunk, "(repl)") {
        Ok(value) => {
            let rendered = state.render_inspect(value);
            println!(" => {rendered}");
        }
        Err(BerylError::Parse { first, .. }) => {
            println!("syntax error: {first}");
        }
        Err(BerylError::Exception { class, message }) => {
            println!("{message} ({class})");
        }
        Err(other) => {
            println!("error: {other}");
        }
    }
}

/// Whether the accumulated input still has an open construct.
fn input_open(source: &str) -> bool {
    let mut diags = Diagnostics::new();
    let outcome = berylc_par::parse_program(source, &mut diags);
    outcome.incomplete
}

fn print_banner() {
    println!("beryl {} (interactive)", env!("CARGO_PKG_VERSION"));
}

fn prompt(continuation: bool, _line: usize) {
    if continuation {
        print!("..> ");
    } else {
        print!(">> ");
    }
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_input_closes() {
        assert!(!input_open("1 + 2\n"));
        assert!(!input_open("def f; end\n"));
    }

    #[test]
    fn test_open_constructs_continue() {
        assert!(input_open("def f\n"));
        assert!(input_open("if x\n"));
        assert!(input_open("class A\n"));
        assert!(input_open("a = [1,\n"));
        assert!(input_open("s = <<EOS\n"));
    }

    #[test]
    fn test_broken_but_closed_input_is_not_open() {
        // a hard syntax error is complete: report it, don't wait
        assert!(!input_open("^^^ 1\n"));
    }
}
