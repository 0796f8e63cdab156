//! Non-local control transfers.
//!
//! Suspension, language-level errors and fatal contract violations all
//! unwind through the same `Flow` plumbing but differ in payload and
//! catchability: a protected call intercepts `Error` only, while `Suspend`
//! grows a snapshot chain on its way out and `Fatal` passes untouched.

use std::fmt;
use std::sync::Arc;

use crate::val::Val;

use super::Callable;
use super::bytecode::Slot;

/// The outcome of one invocation: values in the return sink, or a transfer.
pub type Flow = Result<(), Control>;

#[derive(Debug)]
pub enum Control {
    /// Cooperative transfer carrying the snapshot chain. Not an error;
    /// script-level error handling must never observe it.
    Suspend(Suspension),
    /// Recoverable language-level error (wrong operand type, explicit
    /// `error(v)`, ...). Catchable by a protected call.
    Error(LuaError),
    /// Engine contract violation: invalid resume state, corrupt frame.
    Fatal(EngineError),
}

impl Control {
    pub fn error<S: Into<String>>(msg: S) -> Control {
        Control::Error(LuaError::from_message(msg))
    }

    pub fn fatal<S: Into<String>>(msg: S) -> Control {
        Control::Fatal(EngineError::new(msg))
    }
}

/// Why a chain suspended. Callers see the same snapshot path either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    Yield,
    Preempted,
}

/// Saved state of one suspended invocation: the resumption point plus the
/// registers live there. Only ever built while unwinding on suspension.
#[derive(Debug, Clone)]
pub struct SavedState {
    pub point: u32,
    pub registers: Vec<Slot>,
    pub varargs: Vec<Val>,
}

impl SavedState {
    pub fn empty(point: u32) -> SavedState {
        SavedState {
            point,
            registers: Vec::new(),
            varargs: Vec::new(),
        }
    }
}

/// One element of a snapshot chain.
pub enum SavedFrame {
    /// A suspended invocation of a resumable callee.
    Frame { callee: Arc<dyn Callable>, state: SavedState },
    /// A call boundary preempted before the callee ran; replay performs
    /// the call instead of re-consulting the preemption policy.
    PendingCall { target: Val, args: Vec<Val> },
    /// Innermost marker of an explicit yield; replay delivers the host's
    /// resume values into the return sink.
    Yield,
}

impl fmt::Debug for SavedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SavedFrame::Frame { callee, state } => f
                .debug_struct("Frame")
                .field("callee", &callee.name())
                .field("point", &state.point)
                .field("registers", &state.registers.len())
                .finish(),
            SavedFrame::PendingCall { target, args } => f
                .debug_struct("PendingCall")
                .field("target", &target.type_name())
                .field("args", &args.len())
                .finish(),
            SavedFrame::Yield => write!(f, "Yield"),
        }
    }
}

/// A suspended call chain: snapshots ordered innermost first, plus the
/// values travelling to the host on an explicit yield.
///
/// Deliberately not `Clone`: resuming consumes the chain, so it can never
/// be replayed twice. Dropping it instead of resuming discards the chain
/// with no further cleanup obligations.
#[derive(Debug)]
pub struct Suspension {
    reason: SuspendReason,
    values: Vec<Val>,
    pub(crate) chain: Vec<SavedFrame>,
}

impl Suspension {
    pub(crate) fn yielded(values: Vec<Val>) -> Suspension {
        Suspension {
            reason: SuspendReason::Yield,
            values,
            chain: vec![SavedFrame::Yield],
        }
    }

    pub(crate) fn preempted(target: Val, args: Vec<Val>) -> Suspension {
        Suspension {
            reason: SuspendReason::Preempted,
            values: Vec::new(),
            chain: vec![SavedFrame::PendingCall { target, args }],
        }
    }

    pub fn reason(&self) -> SuspendReason {
        self.reason
    }

    /// Values passed to the explicit yield; empty for forced preemption.
    pub fn values(&self) -> &[Val] {
        &self.values
    }

    /// Number of snapshotted frames, innermost markers included.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }
}

/// A recoverable script error: a value payload plus the traceback collected
/// while unwinding.
#[derive(Debug, Clone)]
pub struct LuaError {
    pub value: Val,
    pub traceback: Vec<Arc<str>>,
}

impl LuaError {
    pub fn new(value: Val) -> LuaError {
        LuaError {
            value,
            traceback: Vec::new(),
        }
    }

    pub fn from_message<S: Into<String>>(msg: S) -> LuaError {
        LuaError::new(Val::str(msg.into()))
    }

    /// Record the frame currently being unwound.
    pub fn with_frame(mut self, name: &str) -> LuaError {
        self.traceback.push(Arc::from(name));
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("runtime error: {}", self.value);
        for frame in &self.traceback {
            out.push_str("\n\tin ");
            out.push_str(frame);
        }
        out
    }
}

/// Fatal misuse of the engine by host or generated code. Never catchable
/// from script code.
#[derive(Debug, Clone)]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new<S: Into<String>>(message: S) -> EngineError {
        EngineError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine contract violation: {}", self.message)
    }
}

impl std::error::Error for EngineError {}
