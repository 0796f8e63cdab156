//! The execution engine: compiled closures, dispatch, suspension.

pub mod builtins;
pub mod bytecode;
pub mod closure;
pub mod compiler;
pub mod context;
pub mod control;
pub mod dispatch;
pub mod preempt;

#[cfg(test)]
pub(crate) mod vm_test;

pub use builtins::{ProtectedCall, new_env};
pub use bytecode::{Instr, Proto, RESULTS_IN_SINK, Slot, UpvalSpec};
pub use closure::{Callable, LuaClosure, NativeFunction};
pub use compiler::{chunk_closure, compile_chunk};
pub use context::{ExecContext, Outcome, ReturnSink, RuntimeServices};
pub use control::{
    Control, EngineError, Flow, LuaError, SavedFrame, SavedState, SuspendReason, Suspension,
};
pub use preempt::Preemption;
