//! Fiber objects.
//!
//! A fiber owns its own context (stack, call-info, rescue and ensure
//! stacks), allocated lazily on construction and referenced by index in
//! the interpreter's context table. Resume/yield are symmetric pointer
//! swaps around a status update; the method bindings live in
//! `builtins::fiber`.

/// The heap body of a Fiber instance.
#[derive(Debug, Default)]
pub struct FiberData {
    /// Index into the interpreter's context table; `None` until the
    /// constructor ran.
    pub ctx: Option<usize>,
}
