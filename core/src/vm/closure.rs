//! Invocable values.
//!
//! A compiled closure is a resumable state machine over its instruction
//! list: the program counter doubles as the resumption point, and a frame
//! snapshot is nothing more than the counter plus the live registers.
//! Native functions run to completion and never resume.

use std::sync::Arc;

use tracing::trace;

use crate::val::{Val, Variable};

use super::bytecode::{Instr, Proto, RESULTS_IN_SINK, Slot, UpvalSpec};
use super::context::ExecContext;
use super::control::{Control, Flow, SavedFrame, SavedState};
use super::dispatch;

/// Anything a `Val::Func` can hold. `invoke` starts a fresh activation;
/// `resume` re-enters a snapshotted one. Callees that never suspend report
/// any `resume` as a fatal engine error.
pub trait Callable: Send + Sync {
    fn invoke(self: Arc<Self>, ctx: &mut ExecContext, args: &[Val]) -> Flow;
    fn resume(self: Arc<Self>, ctx: &mut ExecContext, state: SavedState) -> Flow;
    fn name(&self) -> &str;
}

/// A compiled function bound to its captured variables.
pub struct LuaClosure {
    proto: Arc<Proto>,
    upvalues: Vec<Variable>,
}

impl LuaClosure {
    pub fn new(proto: Arc<Proto>, upvalues: Vec<Variable>) -> LuaClosure {
        LuaClosure { proto, upvalues }
    }

    pub fn proto(&self) -> &Arc<Proto> {
        &self.proto
    }

    fn fresh_registers(&self, args: &[Val]) -> (Vec<Slot>, Vec<Val>) {
        let n_params = self.proto.n_params as usize;
        let mut regs = vec![Slot::nil(); self.proto.n_regs as usize];
        for (i, reg) in regs.iter_mut().enumerate().take(n_params) {
            *reg = Slot::Val(args.get(i).cloned().unwrap_or(Val::Nil));
        }
        let varargs = if self.proto.is_vararg && args.len() > n_params {
            args[n_params..].to_vec()
        } else {
            Vec::new()
        };
        (regs, varargs)
    }

    /// On suspension, push this frame's snapshot onto the chain on the way
    /// out; on a script error, record this frame in the traceback.
    fn unwind(
        self: &Arc<Self>,
        flow: Flow,
        pc: usize,
        regs: &[Slot],
        varargs: &[Val],
    ) -> Flow {
        match flow {
            Err(Control::Suspend(mut s)) => {
                trace!(name = self.name(), point = pc, "snapshotting frame");
                s.chain.push(SavedFrame::Frame {
                    callee: Arc::clone(self) as Arc<dyn Callable>,
                    state: SavedState {
                        point: pc as u32,
                        registers: regs.to_vec(),
                        varargs: varargs.to_vec(),
                    },
                });
                Err(Control::Suspend(s))
            }
            Err(Control::Error(e)) => Err(Control::Error(e.with_frame(self.name()))),
            other => other,
        }
    }

    fn run(
        self: &Arc<Self>,
        ctx: &mut ExecContext,
        mut regs: Vec<Slot>,
        varargs: Vec<Val>,
        start: u32,
    ) -> Flow {
        let proto = Arc::clone(&self.proto);
        let mut pc = start as usize;
        while pc < proto.code.len() {
            match &proto.code[pc] {
                Instr::LoadConst { dst, idx } => {
                    let v = proto.consts[*idx as usize].clone();
                    set(&mut regs, *dst, v);
                }
                Instr::LoadNil { dst } => set(&mut regs, *dst, Val::Nil),
                Instr::LoadBool { dst, value } => set(&mut regs, *dst, Val::Bool(*value)),
                Instr::Move { dst, src } => {
                    let v = get(&regs, *src);
                    set(&mut regs, *dst, v);
                }
                Instr::NewTable { dst } => {
                    set(&mut regs, *dst, Val::Table(crate::val::Table::new()));
                }
                Instr::MakeClosure { dst, proto: child } => {
                    let child = Arc::clone(&proto.protos[*child as usize]);
                    let closure = self.capture(&regs, &child)?;
                    set(&mut regs, *dst, closure);
                }
                Instr::CellNew { reg } => {
                    let current = get(&regs, *reg);
                    regs[*reg as usize] = Slot::Cell(Variable::new(current));
                }
                Instr::CellGet { dst, cell } => {
                    let v = cell_of(&regs, *cell)?.get();
                    set(&mut regs, *dst, v);
                }
                Instr::CellSet { cell, src } => {
                    let v = get(&regs, *src);
                    cell_of(&regs, *cell)?.set(v);
                }
                Instr::UpvalGet { dst, upval } => {
                    let v = self.upvalue(*upval)?.get();
                    set(&mut regs, *dst, v);
                }
                Instr::UpvalSet { upval, src } => {
                    let v = get(&regs, *src);
                    self.upvalue(*upval)?.set(v);
                }
                Instr::Not { dst, src } => {
                    let v = get(&regs, *src);
                    set(&mut regs, *dst, Val::Bool(!v.truthy()));
                }
                Instr::Vararg { dst, count } => {
                    for k in 0..*count as usize {
                        let v = varargs.get(k).cloned().unwrap_or(Val::Nil);
                        set(&mut regs, *dst + k as u16, v);
                    }
                }
                Instr::Jump { to } => {
                    pc = *to as usize;
                    continue;
                }
                Instr::JumpIfFalse { cond, to } => {
                    if !get(&regs, *cond).truthy() {
                        pc = *to as usize;
                        continue;
                    }
                }
                Instr::JumpIfTrue { cond, to } => {
                    if get(&regs, *cond).truthy() {
                        pc = *to as usize;
                        continue;
                    }
                }
                Instr::VarargSink => {
                    ctx.sink_mut().set_to(varargs.clone());
                }
                Instr::Return { base, n } => {
                    let mut out = Vec::with_capacity(*n as usize);
                    for k in 0..*n as usize {
                        out.push(get(&regs, *base + k as u16));
                    }
                    ctx.sink_mut().set_to(out);
                    return Ok(());
                }
                Instr::ReturnSink => return Ok(()),
                Instr::ReturnWithSink { base, n } => {
                    let tail = ctx.sink_mut().take();
                    let mut out = Vec::with_capacity(*n as usize + tail.len());
                    for k in 0..*n as usize {
                        out.push(get(&regs, *base + k as u16));
                    }
                    out.extend(tail);
                    ctx.sink_mut().set_to(out);
                    return Ok(());
                }

                Instr::Arith { op, dst, lhs, rhs } => {
                    let (a, b) = (get(&regs, *lhs), get(&regs, *rhs));
                    let flow = dispatch::arith(ctx, *op, &a, &b);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    set(&mut regs, *dst, ctx.sink().first());
                }
                Instr::Neg { dst, src } => {
                    let v = get(&regs, *src);
                    let flow = dispatch::neg(ctx, &v);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    set(&mut regs, *dst, ctx.sink().first());
                }
                Instr::Len { dst, src } => {
                    let v = get(&regs, *src);
                    let flow = dispatch::len(ctx, &v);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    set(&mut regs, *dst, ctx.sink().first());
                }
                Instr::Compare { op, dst, lhs, rhs } => {
                    let (a, b) = (get(&regs, *lhs), get(&regs, *rhs));
                    let flow = dispatch::compare(ctx, *op, &a, &b);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    set(&mut regs, *dst, ctx.sink().first());
                }
                Instr::Concat { dst, lhs, rhs } => {
                    let (a, b) = (get(&regs, *lhs), get(&regs, *rhs));
                    let flow = dispatch::concat(ctx, &a, &b);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    set(&mut regs, *dst, ctx.sink().first());
                }
                Instr::Index { dst, obj, key } => {
                    let (o, k) = (get(&regs, *obj), get(&regs, *key));
                    let flow = dispatch::index(ctx, &o, &k);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    set(&mut regs, *dst, ctx.sink().first());
                }
                Instr::NewIndex { obj, key, src } => {
                    let (o, k, v) = (get(&regs, *obj), get(&regs, *key), get(&regs, *src));
                    let flow = dispatch::newindex(ctx, &o, &k, &v);
                    self.unwind(flow, pc, &regs, &varargs)?;
                }
                Instr::Call { func, base, n_args, dst, n_results } => {
                    let target = get(&regs, *func);
                    let mut args = Vec::with_capacity(*n_args as usize);
                    for k in 0..*n_args as usize {
                        args.push(get(&regs, *base + k as u16));
                    }
                    let flow = ctx.call(&target, &args);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    if *n_results != RESULTS_IN_SINK {
                        for k in 0..*n_results as usize {
                            let v = ctx.sink().get(k);
                            set(&mut regs, *dst + k as u16, v);
                        }
                    }
                }
                Instr::CallWithSink { func, base, n_fixed, dst, n_results } => {
                    let target = get(&regs, *func);
                    let tail = ctx.sink_mut().take();
                    let mut args = Vec::with_capacity(*n_fixed as usize + tail.len());
                    for k in 0..*n_fixed as usize {
                        args.push(get(&regs, *base + k as u16));
                    }
                    args.extend(tail);
                    let flow = ctx.call(&target, &args);
                    self.unwind(flow, pc, &regs, &varargs)?;
                    if *n_results != RESULTS_IN_SINK {
                        for k in 0..*n_results as usize {
                            let v = ctx.sink().get(k);
                            set(&mut regs, *dst + k as u16, v);
                        }
                    }
                }
            }
            pc += 1;
        }
        // Fell off the end: no results.
        ctx.sink_mut().clear();
        Ok(())
    }

    fn capture(&self, regs: &[Slot], child: &Arc<Proto>) -> Result<Val, Control> {
        let mut upvalues = Vec::with_capacity(child.upvals.len());
        for spec in &child.upvals {
            let cell = match spec {
                UpvalSpec::ParentCell(r) => cell_of(regs, *r)?.clone(),
                UpvalSpec::ParentUpval(i) => self.upvalue(*i)?.clone(),
            };
            upvalues.push(cell);
        }
        Ok(Val::Func(Arc::new(LuaClosure::new(Arc::clone(child), upvalues))))
    }

    fn upvalue(&self, idx: u16) -> Result<&Variable, Control> {
        self.upvalues
            .get(idx as usize)
            .ok_or_else(|| Control::fatal(format!("upvalue index {idx} out of range in '{}'", self.name())))
    }
}

impl Callable for LuaClosure {
    fn invoke(self: Arc<Self>, ctx: &mut ExecContext, args: &[Val]) -> Flow {
        let (regs, varargs) = self.fresh_registers(args);
        self.run(ctx, regs, varargs, 0)
    }

    fn resume(self: Arc<Self>, ctx: &mut ExecContext, state: SavedState) -> Flow {
        let point = state.point as usize;
        let valid = self
            .proto
            .code
            .get(point)
            .is_some_and(Instr::is_suspendable)
            && state.registers.len() == self.proto.n_regs as usize;
        if !valid {
            return Err(Control::fatal(format!(
                "invalid resume state for '{}': point {} with {} register(s)",
                self.name(),
                state.point,
                state.registers.len()
            )));
        }
        self.run(ctx, state.registers, state.varargs, state.point)
    }

    fn name(&self) -> &str {
        &self.proto.name
    }
}

fn get(regs: &[Slot], i: u16) -> Val {
    match &regs[i as usize] {
        Slot::Val(v) => v.clone(),
        Slot::Cell(c) => c.get(),
    }
}

/// Plain writes rebind the register. Assignments to a captured local
/// compile to `CellSet`/`UpvalSet`, so a cell left in a reused register by
/// a finished scope or loop iteration is replaced here, never written
/// through into closures that still hold it.
fn set(regs: &mut [Slot], i: u16, v: Val) {
    regs[i as usize] = Slot::Val(v);
}

fn cell_of(regs: &[Slot], i: u16) -> Result<&Variable, Control> {
    match &regs[i as usize] {
        Slot::Cell(c) => Ok(c),
        Slot::Val(_) => Err(Control::fatal(format!("register {i} does not hold a shared cell"))),
    }
}

/// A host function exposed to scripts. Runs to completion inside `invoke`;
/// the function may itself call back into the engine through the context.
pub struct NativeFunction {
    name: &'static str,
    f: fn(&mut ExecContext, &[Val]) -> Flow,
}

impl NativeFunction {
    pub fn new(name: &'static str, f: fn(&mut ExecContext, &[Val]) -> Flow) -> Val {
        Val::Func(Arc::new(NativeFunction { name, f }))
    }
}

impl Callable for NativeFunction {
    fn invoke(self: Arc<Self>, ctx: &mut ExecContext, args: &[Val]) -> Flow {
        (self.f)(ctx, args)
    }

    fn resume(self: Arc<Self>, _ctx: &mut ExecContext, _state: SavedState) -> Flow {
        Err(Control::fatal(format!(
            "native function '{}' cannot appear in a snapshot chain",
            self.name
        )))
    }

    fn name(&self) -> &str {
        self.name
    }
}
