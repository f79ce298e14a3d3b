//! Integer and Float methods beyond the opcode fast paths.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::state::{Args, State};
use crate::value::Value;
use crate::vm_ops::format_float;

pub fn install(state: &mut State) {
    let integer = state.core.integer;
    state.define_method(integer, "to_s", ArgSpec::NONE, int_to_s);
    state.define_method(integer, "inspect", ArgSpec::NONE, int_to_s);
    state.define_method(integer, "to_i", ArgSpec::NONE, int_to_i);
    state.define_method(integer, "to_f", ArgSpec::NONE, int_to_f);
    state.define_method(integer, "abs", ArgSpec::NONE, int_abs);
    state.define_method(integer, "%", ArgSpec::req(1), int_mod);
    state.define_method(integer, "-@", ArgSpec::NONE, int_neg);
    state.define_method(integer, "<=>", ArgSpec::req(1), num_cmp);
    state.define_method(integer, "succ", ArgSpec::NONE, int_succ);
    state.define_method(integer, "zero?", ArgSpec::NONE, int_zero_p);
    state.define_method(integer, "**", ArgSpec::req(1), int_pow);
    state.define_method(integer, "&", ArgSpec::req(1), int_bitand);
    state.define_method(integer, "|", ArgSpec::req(1), int_bitor);
    state.define_method(integer, "^", ArgSpec::req(1), int_bitxor);
    state.define_method(integer, "<<", ArgSpec::req(1), int_shl);
    state.define_method(integer, ">>", ArgSpec::req(1), int_shr);
    state.define_method(integer, "~", ArgSpec::NONE, int_bitnot);

    let float = state.core.float;
    state.define_method(float, "to_s", ArgSpec::NONE, float_to_s);
    state.define_method(float, "inspect", ArgSpec::NONE, float_to_s);
    state.define_method(float, "to_i", ArgSpec::NONE, float_to_i);
    state.define_method(float, "to_f", ArgSpec::NONE, float_to_f);
    state.define_method(float, "abs", ArgSpec::NONE, float_abs);
    state.define_method(float, "-@", ArgSpec::NONE, float_neg);
    state.define_method(float, "<=>", ArgSpec::req(1), num_cmp);
    state.define_method(float, "floor", ArgSpec::NONE, float_floor);
    state.define_method(float, "ceil", ArgSpec::NONE, float_ceil);
}

fn int_of(state: &mut State, v: Value) -> VmResult<i64> {
    match v {
        Value::Int(i) => Ok(i),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "integer expected"))
        }
    }
}

fn int_to_s(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    state.new_str(i.to_string())
}

fn int_to_i(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(recv)
}

fn int_to_f(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    Ok(Value::Float(i as f64))
}

fn int_abs(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    Ok(match i.checked_abs() {
        Some(v) => Value::Int(v),
        None => Value::Float((i as f64).abs()),
    })
}

fn int_mod(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    match args.get(0) {
        Value::Int(0) => Ok(Value::Float(f64::NAN)),
        Value::Int(-1) => Ok(Value::Int(0)),
        Value::Int(j) => Ok(Value::Int(floored_mod(i, j))),
        Value::Float(f) => {
            let r = (i as f64) % f;
            // floored: the result carries the divisor's sign
            let r = if r != 0.0 && (r < 0.0) != (f < 0.0) {
                r + f
            } else {
                r
            };
            Ok(Value::Float(r))
        }
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "integer expected"))
        }
    }
}

/// Floored modulo: the result takes the sign of the divisor, so
/// `7 % -3` is -2 and `-7 % 3` is 2. The caller screens out zero and
/// -1 divisors.
fn floored_mod(i: i64, j: i64) -> i64 {
    let r = i % j;
    if r != 0 && (r < 0) != (j < 0) {
        r + j
    } else {
        r
    }
}

fn int_neg(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    Ok(match i.checked_neg() {
        Some(v) => Value::Int(v),
        None => Value::Float(-(i as f64)),
    })
}

fn num_cmp(_state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    // integer pairs order exactly; only mixed comparisons widen
    if let (Value::Int(a), Value::Int(b)) = (recv, args.get(0)) {
        return Ok(Value::Int(match a.cmp(&b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }));
    }
    let pair = match (recv, args.get(0)) {
        (Value::Int(a), Value::Float(b)) => Some((a as f64, b)),
        (Value::Float(a), Value::Int(b)) => Some((a, b as f64)),
        (Value::Float(a), Value::Float(b)) => Some((a, b)),
        _ => None,
    };
    Ok(match pair {
        Some((a, b)) => match a.partial_cmp(&b) {
            Some(std::cmp::Ordering::Less) => Value::Int(-1),
            Some(std::cmp::Ordering::Equal) => Value::Int(0),
            Some(std::cmp::Ordering::Greater) => Value::Int(1),
            None => Value::Nil,
        },
        None => Value::Nil,
    })
}

fn int_succ(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    Ok(match i.checked_add(1) {
        Some(v) => Value::Int(v),
        None => Value::Float(i as f64 + 1.0),
    })
}

fn int_zero_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    Ok(Value::bool(i == 0))
}

fn int_pow(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    match args.get(0) {
        Value::Int(e) if e >= 0 => Ok(match u32::try_from(e).ok().and_then(|e| i.checked_pow(e)) {
            Some(v) => Value::Int(v),
            None => Value::Float((i as f64).powf(e as f64)),
        }),
        Value::Int(e) => Ok(Value::Float((i as f64).powf(e as f64))),
        Value::Float(f) => Ok(Value::Float((i as f64).powf(f))),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "numeric expected"))
        }
    }
}

fn int_bitand(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    let j = int_of(state, args.get(0))?;
    Ok(Value::Int(i & j))
}

fn int_bitor(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    let j = int_of(state, args.get(0))?;
    Ok(Value::Int(i | j))
}

fn int_bitxor(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    let j = int_of(state, args.get(0))?;
    Ok(Value::Int(i ^ j))
}

fn int_shl(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    let j = int_of(state, args.get(0))?;
    if !(0..64).contains(&j) {
        return Ok(Value::Float((i as f64) * 2f64.powi(j as i32)));
    }
    Ok(match i.checked_shl(j as u32) {
        Some(v) => Value::Int(v),
        None => Value::Float((i as f64) * 2f64.powi(j as i32)),
    })
}

fn int_shr(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    let j = int_of(state, args.get(0))?;
    Ok(Value::Int(i >> j.clamp(0, 63)))
}

fn int_bitnot(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let i = int_of(state, recv)?;
    Ok(Value::Int(!i))
}

fn float_of(state: &mut State, v: Value) -> VmResult<f64> {
    match v {
        Value::Float(f) => Ok(f),
        Value::Int(i) => Ok(i as f64),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "float expected"))
        }
    }
}

fn float_to_s(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let f = float_of(state, recv)?;
    state.new_str(format_float(f))
}

fn float_to_i(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let f = float_of(state, recv)?;
    Ok(Value::Int(f.trunc() as i64))
}

fn float_to_f(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(recv)
}

fn float_abs(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let f = float_of(state, recv)?;
    Ok(Value::Float(f.abs()))
}

fn float_neg(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let f = float_of(state, recv)?;
    Ok(Value::Float(-f))
}

fn float_floor(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let f = float_of(state, recv)?;
    Ok(Value::Int(f.floor() as i64))
}

fn float_ceil(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let f = float_of(state, recv)?;
    Ok(Value::Int(f.ceil() as i64))
}
