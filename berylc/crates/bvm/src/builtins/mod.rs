//! Built-in classes and methods.
//!
//! Native methods cover the primitives (allocation, indexing, printing,
//! fiber switching); the iteration protocol (`times`, `each`, `map`,
//! `loop`) is written in the language itself and compiled at boot (see
//! `prelude.brl`), so `break`/`next`/`yield` flow through the ordinary
//! VM unwind paths instead of special native cases.

mod array;
mod exception;
mod fiber;
mod gc;
mod hash;
mod kernel;
mod module_class;
mod numeric;
mod object;
mod proc_class;
mod range;
mod string;

use log::debug;

use crate::obj::VType;
use crate::state::State;

const PRELUDE: &str = include_str!("prelude.brl");

/// Install every built-in class, then run the prelude.
pub fn install(state: &mut State) {
    define_core_classes(state);
    object::install(state);
    module_class::install(state);
    kernel::install(state);
    numeric::install(state);
    string::install(state);
    array::install(state);
    hash::install(state);
    range::install(state);
    proc_class::install(state);
    exception::install(state);
    gc::install(state);
    fiber::install(state);

    match crate::api::load_internal(state, PRELUDE, "prelude") {
        Ok(_) => debug!("prelude loaded"),
        Err(e) => panic!("boot prelude failed to load: {e}"),
    }
}

fn define_core_classes(state: &mut State) {
    let object = state.core.object;

    state.core.kernel = state
        .define_module("Kernel")
        .expect("boot allocation cannot fail");
    let kernel = state.core.kernel;
    state
        .include_module(object, kernel)
        .expect("boot allocation cannot fail");

    let mut class_with_tt = |state: &mut State, name: &str, tt: VType| {
        let c = state
            .define_class(name, object)
            .expect("boot allocation cannot fail");
        if let Some(data) = state.as_class_mut(c) {
            data.instance_tt = tt;
        }
        c
    };

    state.core.nil_class = class_with_tt(state, "NilClass", VType::Object);
    state.core.true_class = class_with_tt(state, "TrueClass", VType::Object);
    state.core.false_class = class_with_tt(state, "FalseClass", VType::Object);
    state.core.integer = class_with_tt(state, "Integer", VType::Object);
    state.core.float = class_with_tt(state, "Float", VType::Object);
    state.core.symbol = class_with_tt(state, "Symbol", VType::Object);
    state.core.string = class_with_tt(state, "String", VType::Str);
    state.core.array = class_with_tt(state, "Array", VType::Array);
    state.core.hash = class_with_tt(state, "Hash", VType::Hash);
    state.core.range = class_with_tt(state, "Range", VType::Range);
    state.core.proc_class = class_with_tt(state, "Proc", VType::Proc);
    state.core.fiber = class_with_tt(state, "Fiber", VType::Fiber);

    state.core.exception = class_with_tt(state, "Exception", VType::Exception);
    let exception = state.core.exception;
    let mut exc_class = |state: &mut State, name: &str, superclass| {
        let c = state
            .define_class(name, superclass)
            .expect("boot allocation cannot fail");
        if let Some(data) = state.as_class_mut(c) {
            data.instance_tt = VType::Exception;
        }
        c
    };
    state.core.standard_error = exc_class(state, "StandardError", exception);
    let std_error = state.core.standard_error;
    state.core.runtime_error = exc_class(state, "RuntimeError", std_error);
    state.core.argument_error = exc_class(state, "ArgumentError", std_error);
    state.core.type_error = exc_class(state, "TypeError", std_error);
    state.core.name_error = exc_class(state, "NameError", std_error);
    state.core.no_method_error = exc_class(state, "NoMethodError", state.core.name_error);
    state.core.index_error = exc_class(state, "IndexError", std_error);
    state.core.range_error = exc_class(state, "RangeError", std_error);
    state.core.local_jump_error = exc_class(state, "LocalJumpError", std_error);
    state.core.not_implemented_error = exc_class(state, "NotImplementedError", std_error);
    state.core.stop_iteration = exc_class(state, "StopIteration", std_error);
}
