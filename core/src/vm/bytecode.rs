use std::fmt;
use std::sync::Arc;

use crate::op::{ArithOp, CmpOp};
use crate::val::{Val, Variable};

/// A register slot. A local that nested closures capture holds its shared
/// `Variable` cell right in the register, so snapshotting a frame clones
/// the handle and sharing survives suspend/resume.
#[derive(Debug, Clone)]
pub enum Slot {
    Val(Val),
    Cell(Variable),
}

impl Slot {
    pub fn nil() -> Slot {
        Slot::Val(Val::Nil)
    }
}

/// In `Call`, a result count of `RESULTS_IN_SINK` leaves the callee's
/// values in the return sink instead of materializing them into registers;
/// the following instruction is then `ReturnSink`.
pub const RESULTS_IN_SINK: u8 = u8::MAX;

/// How a nested prototype captures each of its upvalues from the frame
/// executing `MakeClosure`.
#[derive(Debug, Clone, Copy)]
pub enum UpvalSpec {
    /// A register of the enclosing frame holding a `Slot::Cell`.
    ParentCell(u16),
    /// An upvalue of the enclosing closure, shared onward.
    ParentUpval(u16),
}

/// One instruction of a compiled body. The instruction index is the
/// resumption point: transient instructions never suspend, while the
/// suspendable ones (anything that can enter a call or metamethod) are the
/// only valid places for a frame snapshot to point at.
#[derive(Debug, Clone)]
pub enum Instr {
    // -- transient --
    LoadConst { dst: u16, idx: u16 },
    LoadNil { dst: u16 },
    LoadBool { dst: u16, value: bool },
    Move { dst: u16, src: u16 },
    NewTable { dst: u16 },
    MakeClosure { dst: u16, proto: u16 },
    /// Rebind a register as a fresh shared cell holding its current value.
    CellNew { reg: u16 },
    CellGet { dst: u16, cell: u16 },
    CellSet { cell: u16, src: u16 },
    UpvalGet { dst: u16, upval: u16 },
    UpvalSet { upval: u16, src: u16 },
    Not { dst: u16, src: u16 },
    /// Copy `count` vararg values, nil-padded, into `dst..`.
    Vararg { dst: u16, count: u8 },
    Jump { to: u32 },
    JumpIfFalse { cond: u16, to: u32 },
    JumpIfTrue { cond: u16, to: u32 },
    /// Replace the sink with all of the frame's varargs (`...` in a tail).
    VarargSink,
    Return { base: u16, n: u8 },
    /// Return whatever the previous call left in the sink.
    ReturnSink,
    /// Return `n` register values followed by everything in the sink.
    ReturnWithSink { base: u16, n: u8 },

    // -- suspendable sites --
    Arith { op: ArithOp, dst: u16, lhs: u16, rhs: u16 },
    Neg { dst: u16, src: u16 },
    Len { dst: u16, src: u16 },
    Compare { op: CmpOp, dst: u16, lhs: u16, rhs: u16 },
    Concat { dst: u16, lhs: u16, rhs: u16 },
    Index { dst: u16, obj: u16, key: u16 },
    NewIndex { obj: u16, key: u16, src: u16 },
    Call { func: u16, base: u16, n_args: u8, dst: u16, n_results: u8 },
    /// Like `Call`, with `n_fixed` register arguments followed by every
    /// value currently in the sink (a multi-value tail in argument position).
    CallWithSink { func: u16, base: u16, n_fixed: u8, dst: u16, n_results: u8 },
}

impl Instr {
    /// Valid resumption points are exactly the suspendable sites.
    pub fn is_suspendable(&self) -> bool {
        matches!(
            self,
            Instr::Arith { .. }
                | Instr::Neg { .. }
                | Instr::Len { .. }
                | Instr::Compare { .. }
                | Instr::Concat { .. }
                | Instr::Index { .. }
                | Instr::NewIndex { .. }
                | Instr::Call { .. }
                | Instr::CallWithSink { .. }
        )
    }
}

/// An immutable compiled function body.
#[derive(Clone)]
pub struct Proto {
    pub name: Arc<str>,
    pub consts: Vec<Val>,
    pub code: Vec<Instr>,
    pub n_regs: u16,
    pub n_params: u16,
    pub is_vararg: bool,
    pub protos: Vec<Arc<Proto>>,
    /// Capture plan used by the *parent's* `MakeClosure`. Empty for a chunk,
    /// whose single implicit `_ENV` upvalue is supplied by the host.
    pub upvals: Vec<UpvalSpec>,
}

impl fmt::Debug for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proto")
            .field("name", &self.name)
            .field("n_regs", &self.n_regs)
            .field("n_params", &self.n_params)
            .field("is_vararg", &self.is_vararg)
            .field("code_len", &self.code.len())
            .field("protos", &self.protos.len())
            .finish()
    }
}
