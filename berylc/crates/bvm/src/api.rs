//! Host embedding surface.
//!
//! Everything a host links against: compile and run source text, load
//! and dump binary images, call methods, reach globals/ivars/constants,
//! and bracket allocations with the arena.

use std::rc::Rc;

use berylc_bc::Irep;
use berylc_util::Diagnostics;
use log::debug;

use crate::context::{CiProc, ACC_TO_HOST};
use crate::error::{BerylError, VmError, VmResult};
use crate::proc_env::{ProcBody, ProcData};
use crate::state::State;
use crate::value::Value;

/// Compile source to an IREP without running it.
pub fn compile_source(
    state: &mut State,
    source: &str,
    name: &str,
) -> Result<Rc<Irep>, BerylError> {
    let mut diags = Diagnostics::new();
    let outcome = berylc_par::parse_program(source, &mut diags);
    if diags.has_errors() {
        let first = diags
            .first_error()
            .map(|d| format!("{} (at {})", d.message, d.span))
            .unwrap_or_else(|| "syntax error".to_string());
        return Err(BerylError::Parse {
            first,
            count: diags.error_count(),
        });
    }
    let irep = berylc_gen::generate(&outcome.program, &mut state.symbols, Some(name))?;
    debug!(
        "compiled {name}: {} instructions over {} scopes",
        irep.total_len(),
        1 + irep.reps.len()
    );
    Ok(irep)
}

/// Evaluate source text at the top level.
pub fn load_internal(state: &mut State, source: &str, name: &str) -> Result<Value, BerylError> {
    let irep = compile_source(state, source, name)?;
    exec_top(state, irep)
}

/// Run a loaded IREP at the top level, delivering either the value of
/// the last expression or the unhandled exception.
pub fn exec_top(state: &mut State, irep: Rc<Irep>) -> Result<Value, BerylError> {
    let ai = state.heap.arena_save();
    let object = state.core.object;
    let nregs = irep.nregs as usize;
    let proc_ref = state
        .new_proc(ProcData {
            body: ProcBody::Irep(irep),
            env: None,
            target_class: Some(object),
            strict: false,
        })
        .map_err(|e| host_error(state, e))?;

    let base = state.ctx().sbase;
    {
        let ci = state.cipush();
        ci.proc = CiProc::Proc(proc_ref);
        ci.acc = ACC_TO_HOST;
        ci.stackidx = base;
        ci.target_class = Some(object);
        ci.nregs = nregs;
    }
    let top_self = state.top_self;
    state.set_reg(0, Value::Obj(top_self));
    let result = state.vm_run();
    state.heap.arena_restore(ai);
    match result {
        Ok(v) => {
            state.gc_protect(v);
            Ok(v)
        }
        Err(e) => Err(host_error(state, e)),
    }
}

/// Translate a VM error for the host, remembering the exception value.
fn host_error(state: &mut State, e: VmError) -> BerylError {
    match e {
        VmError::Raise(v) => {
            state.last_exc = Some(v);
            BerylError::Exception {
                class: state.class_name(state.real_class_of(v)),
                message: state.exc_message(v),
            }
        }
        VmError::Fatal(m) => BerylError::Fatal(m),
    }
}

impl State {
    /// Evaluate source text in the top-level context.
    pub fn load_string(&mut self, source: &str, name: &str) -> Result<Value, BerylError> {
        load_internal(self, source, name)
    }

    /// Evaluate a source file.
    pub fn load_file(&mut self, path: &std::path::Path) -> Result<Value, BerylError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| BerylError::Fatal(format!("cannot read {}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        load_internal(self, &source, &name)
    }

    /// Compile without executing; the CLI's disassembler path.
    pub fn compile(&mut self, source: &str, name: &str) -> Result<Rc<Irep>, BerylError> {
        compile_source(self, source, name)
    }

    /// Serialize compiled source to a binary image.
    pub fn compile_to_image(
        &mut self,
        source: &str,
        name: &str,
        debug_info: bool,
    ) -> Result<Vec<u8>, BerylError> {
        let irep = compile_source(self, source, name)?;
        Ok(berylc_bc::image::dump_irep(&irep, &self.symbols, debug_info)?)
    }

    /// Load and run a binary image. A checksum or structure failure is
    /// fatal: no record of a corrupt image is trusted.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<Value, BerylError> {
        let irep = berylc_bc::image::load_irep(bytes, &mut self.symbols)?;
        exec_top(self, irep)
    }

    /// Run an already-loaded IREP.
    pub fn run_irep(&mut self, irep: Rc<Irep>) -> Result<Value, BerylError> {
        exec_top(self, irep)
    }

    /// The exception value behind the last `BerylError::Exception`.
    pub fn last_exception(&self) -> Option<Value> {
        self.last_exc
    }

    /// Mark a value as a root until the bracketing arena restore.
    pub fn gc_protect(&mut self, v: Value) {
        if let Value::Obj(r) = v {
            self.heap.protect(r);
        }
    }

    pub fn arena_save(&self) -> usize {
        self.heap.arena_save()
    }

    pub fn arena_restore(&mut self, idx: usize) {
        self.heap.arena_restore(idx)
    }

    /// Host-facing global access by name.
    pub fn global_get(&mut self, name: &str) -> Value {
        let sym = self.intern(name);
        self.gv_get(sym)
    }

    pub fn global_set(&mut self, name: &str, value: Value) {
        let sym = self.intern(name);
        self.gv_set(sym, value);
    }

    /// Host-facing constant access under Object.
    pub fn const_get_root(&mut self, name: &str) -> Option<Value> {
        let sym = self.intern(name);
        self.const_lookup(self.core.object, sym)
    }

    pub fn const_set_root(&mut self, name: &str, value: Value) {
        let sym = self.intern(name);
        let object = self.core.object;
        self.const_set_on(object, sym, value);
    }

    /// Host-facing ivar access.
    pub fn ivar_get(&mut self, obj: Value, name: &str) -> Value {
        let sym = self.intern(name);
        match obj {
            Value::Obj(r) => self.iv_get_raw(r, sym).unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    pub fn ivar_set(&mut self, obj: Value, name: &str, value: Value) {
        let sym = self.intern(name);
        if let Value::Obj(r) = obj {
            self.iv_set_raw(r, sym, value);
        }
    }

    /// Render a value for display, as the REPL does.
    pub fn render_inspect(&mut self, v: Value) -> String {
        self.inspect_value(v)
            .unwrap_or_else(|_| "#<uninspectable>".to_string())
    }

    /// Yield into a block value from host code.
    pub fn host_yield(&mut self, block: Value, args: Vec<Value>) -> Result<Value, BerylError> {
        match self.yield_value(block, args) {
            Ok(v) => Ok(v),
            Err(e) => Err(host_error(self, e)),
        }
    }

    /// Host-facing method call.
    pub fn call(&mut self, recv: Value, name: &str, args: Vec<Value>) -> Result<Value, BerylError> {
        match self.funcall(recv, name, args) {
            Ok(v) => Ok(v),
            Err(e) => Err(host_error(self, e)),
        }
    }
}

/// Result type used by native extension methods.
pub type NativeResult = VmResult<Value>;
