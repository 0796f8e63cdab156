//! lura-core: a suspendable, register-based Lua-compatible execution
//! engine.
//!
//! Compiled functions are resumable state machines. Any call chain can be
//! cut at a call boundary into a [`vm::Suspension`] — an explicit yield or
//! a forced preemption — handed to the host as a plain value, and later
//! replayed to the exact point it left off. See the `vm` module for the
//! engine and `rt` for coroutines built on top of it.

pub mod ast;
pub mod op;
pub mod rt;
pub mod util;
pub mod val;
pub mod vm;
