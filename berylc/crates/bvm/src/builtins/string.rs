//! String methods.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let string = state.core.string;
    state.define_method(string, "to_s", ArgSpec::NONE, to_s);
    state.define_method(string, "to_sym", ArgSpec::NONE, to_sym);
    state.define_method(string, "intern", ArgSpec::NONE, to_sym);
    state.define_method(string, "inspect", ArgSpec::NONE, inspect);
    state.define_method(string, "size", ArgSpec::NONE, size);
    state.define_method(string, "length", ArgSpec::NONE, size);
    state.define_method(string, "empty?", ArgSpec::NONE, empty_p);
    state.define_method(string, "==", ArgSpec::req(1), eq);
    state.define_method(string, "eql?", ArgSpec::req(1), eq);
    state.define_method(string, "+", ArgSpec::req(1), plus);
    state.define_method(string, "*", ArgSpec::req(1), times);
    state.define_method(string, "<<", ArgSpec::req(1), concat);
    state.define_method(string, "concat", ArgSpec::req(1), concat);
    state.define_method(string, "[]", ArgSpec::opt(1, 1), index);
    state.define_method(string, "include?", ArgSpec::req(1), include_p);
    state.define_method(string, "reverse", ArgSpec::NONE, reverse);
    state.define_method(string, "upcase", ArgSpec::NONE, upcase);
    state.define_method(string, "downcase", ArgSpec::NONE, downcase);
    state.define_method(string, "strip", ArgSpec::NONE, strip);
    state.define_method(string, "split", ArgSpec::opt(0, 1), split);
    state.define_method(string, "to_i", ArgSpec::NONE, to_i);
    state.define_method(string, "to_f", ArgSpec::NONE, to_f);
    state.define_method(string, "dup", ArgSpec::NONE, dup);
    state.define_method(string, "<=>", ArgSpec::req(1), cmp);
}

fn text_of(state: &mut State, v: Value) -> VmResult<String> {
    match state.str_text(v) {
        Some(t) => Ok(t.to_string()),
        None => {
            let err = state.core.type_error;
            Err(state.raise(err, "string expected"))
        }
    }
}

fn to_s(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(recv)
}

fn to_sym(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    let sym = state.intern(&text);
    Ok(Value::Sym(sym))
}

fn inspect(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    state.new_str(format!("{text:?}"))
}

fn size(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    Ok(Value::Int(text.chars().count() as i64))
}

fn empty_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    Ok(Value::bool(text.is_empty()))
}

fn eq(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let a = text_of(state, recv)?;
    Ok(match state.str_text(args.get(0)) {
        Some(b) => Value::bool(a == b),
        None => Value::False,
    })
}

fn plus(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let a = text_of(state, recv)?;
    let b = text_of(state, args.get(0))?;
    state.new_str(format!("{a}{b}"))
}

/// `str * n`; a negative count raises ArgumentError.
fn times(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    let Value::Int(n) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "integer expected"));
    };
    if n < 0 {
        let err = state.core.argument_error;
        return Err(state.raise(err, "negative argument"));
    }
    state.new_str(text.repeat(n as usize))
}

fn concat(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let addition = state.obj_to_s(args.get(0))?;
    let Value::Obj(r) = recv else {
        let err = state.core.type_error;
        return Err(state.raise(err, "string expected"));
    };
    if let ObjBody::Str(s) = state.body_mut(r) {
        s.concat(&addition);
    }
    Ok(recv)
}

/// `str[i]` / `str[i, len]` with negative indexing.
fn index(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let Value::Int(mut i) = args.get(0) else {
        // substring search form
        if let Some(needle) = state.str_text(args.get(0)) {
            let found = text.contains(needle);
            let needle = needle.to_string();
            return if found {
                state.new_str(needle)
            } else {
                Ok(Value::Nil)
            };
        }
        let err = state.core.type_error;
        return Err(state.raise(err, "integer expected"));
    };
    if i < 0 {
        i += len;
    }
    if i < 0 || i >= len {
        return Ok(Value::Nil);
    }
    let count = match args.args.get(1) {
        Some(Value::Int(n)) => (*n).max(0) as usize,
        _ => 1,
    };
    let slice: String = chars[i as usize..].iter().take(count).collect();
    state.new_str(slice)
}

fn include_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    let needle = text_of(state, args.get(0))?;
    Ok(Value::bool(text.contains(&needle)))
}

fn reverse(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    state.new_str(text.chars().rev().collect::<String>())
}

fn upcase(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    state.new_str(text.to_uppercase())
}

fn downcase(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    state.new_str(text.to_lowercase())
}

fn strip(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    state.new_str(text.trim().to_string())
}

fn split(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    let parts: Vec<String> = match args.args.first() {
        None => text.split_whitespace().map(|s| s.to_string()).collect(),
        Some(sep) => {
            let sep = text_of(state, *sep)?;
            text.split(&sep).map(|s| s.to_string()).collect()
        }
    };
    let mut values = Vec::with_capacity(parts.len());
    for part in parts {
        values.push(state.new_str(part)?);
    }
    state.new_array(values)
}

fn to_i(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    let trimmed = text.trim();
    let digits: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        .collect();
    Ok(Value::Int(digits.parse().unwrap_or(0)))
}

fn to_f(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = text_of(state, recv)?;
    Ok(Value::Float(text.trim().parse().unwrap_or(0.0)))
}

fn dup(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let Value::Obj(r) = recv else {
        return Ok(recv);
    };
    let copy = match state.body_mut(r) {
        ObjBody::Str(s) => s.dup(),
        _ => {
            let err = state.core.type_error;
            return Err(state.raise(err, "string expected"));
        }
    };
    let class = state.core.string;
    let nr = state.alloc(ObjBody::Str(copy), class)?;
    Ok(Value::Obj(nr))
}

fn cmp(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let a = text_of(state, recv)?;
    Ok(match state.str_text(args.get(0)) {
        Some(b) => Value::Int(match a.as_str().cmp(b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }),
        None => Value::Nil,
    })
}
