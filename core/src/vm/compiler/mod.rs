//! Lowering from the surface tree to compiled prototypes.
//!
//! One `FuncState` per function literal, kept on a stack so upvalue
//! resolution can walk outward and install capture specs in every
//! intermediate function. Registers follow the usual discipline: locals
//! at the bottom of the frame, temporaries above a per-statement
//! watermark that is rolled back once the statement is lowered.

use std::sync::Arc;

use anyhow::{Result, bail, ensure};
use tracing::debug;

use crate::ast::{AssignTarget, Block, Expr, FuncBody, Stmt, TableItem};
use crate::op::{BinOp, UnOp};
use crate::util::fast_map::FastHashSet;
use crate::val::{Table, Val, Variable};

use super::bytecode::{Instr, Proto, RESULTS_IN_SINK, UpvalSpec};
use super::closure::LuaClosure;

mod free_vars;

/// Frame size limit; generous, but keeps indices comfortably in `u16`.
const MAX_REGS: u16 = 250;
/// Limit on explicit values at one site (arguments, returns, targets).
const MAX_MULTI: usize = 200;

/// Compile one chunk. The produced prototype expects a single upvalue,
/// `_ENV`, supplied by the host via [`chunk_closure`].
pub fn compile_chunk(chunk: &FuncBody, chunk_name: &str) -> Result<Arc<Proto>> {
    let mut c = Compiler { funcs: Vec::new() };
    let proto = c.function(chunk, Arc::from(chunk_name), true)?;
    debug!(chunk = chunk_name, code = proto.code.len(), regs = proto.n_regs, "chunk compiled");
    Ok(proto)
}

/// Bind a compiled chunk to its global environment.
pub fn chunk_closure(proto: Arc<Proto>, env: Arc<Table>) -> Val {
    Val::Func(Arc::new(LuaClosure::new(
        proto,
        vec![Variable::new(Val::Table(env))],
    )))
}

struct FuncState {
    name: Arc<str>,
    consts: Vec<Val>,
    code: Vec<Instr>,
    protos: Vec<Arc<Proto>>,
    upval_names: Vec<String>,
    upvals: Vec<UpvalSpec>,
    /// Innermost scope last; each scope maps a name to its register.
    scopes: Vec<Vec<(String, u16)>>,
    /// Locals (and parameters) inner literals capture; they live in cells.
    captured: FastHashSet<String>,
    n_params: u16,
    is_vararg: bool,
    /// Next free register; also the temp watermark.
    free: u16,
    n_regs: u16,
}

impl FuncState {
    fn reserve(&mut self) -> Result<u16> {
        if self.free >= MAX_REGS {
            bail!("function '{}' needs too many registers", self.name);
        }
        let r = self.free;
        self.free += 1;
        self.n_regs = self.n_regs.max(self.free);
        Ok(r)
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.iter().rev().find(|(n, _)| n == name).map(|(_, r)| *r))
    }

    fn add_const(&mut self, v: Val) -> Result<u16> {
        if let Some(i) = self.consts.iter().position(|c| const_eq(c, &v)) {
            return Ok(i as u16);
        }
        ensure!(self.consts.len() < u16::MAX as usize, "too many constants in '{}'", self.name);
        self.consts.push(v);
        Ok((self.consts.len() - 1) as u16)
    }
}

/// Exact-representation equality for constant pooling. `Val`'s own
/// equality is numeric across Int/Float, which must not merge `1` and
/// `1.0` here: they behave differently under arithmetic.
fn const_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Nil, Val::Nil) => true,
        (Val::Bool(x), Val::Bool(y)) => x == y,
        (Val::Int(x), Val::Int(y)) => x == y,
        (Val::Float(x), Val::Float(y)) => x.to_bits() == y.to_bits(),
        (Val::Str(x), Val::Str(y)) => x == y,
        _ => false,
    }
}

enum Prepared {
    Local { reg: u16, cell: bool },
    Upval(u16),
    Indexed { obj: u16, key: u16 },
}

struct Compiler {
    funcs: Vec<FuncState>,
}

impl Compiler {
    fn cur(&mut self) -> &mut FuncState {
        match self.funcs.last_mut() {
            Some(fs) => fs,
            None => unreachable!("no function being lowered"),
        }
    }

    fn emit(&mut self, i: Instr) -> usize {
        let fs = self.cur();
        fs.code.push(i);
        fs.code.len() - 1
    }

    fn patch_jump(&mut self, at: usize) {
        let to = self.cur().code.len() as u32;
        match &mut self.cur().code[at] {
            Instr::Jump { to: t }
            | Instr::JumpIfFalse { to: t, .. }
            | Instr::JumpIfTrue { to: t, .. } => *t = to,
            other => unreachable!("patching a non-jump instruction {other:?}"),
        }
    }

    fn function(&mut self, fb: &FuncBody, name: Arc<str>, is_chunk: bool) -> Result<Arc<Proto>> {
        ensure!((fb.params.len() as u16) < MAX_REGS, "too many parameters in '{name}'");
        let captured = free_vars::captured_by_inner(&fb.body);
        let n_params = fb.params.len() as u16;
        let param_scope = fb
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i as u16))
            .collect();
        self.funcs.push(FuncState {
            name,
            consts: Vec::new(),
            code: Vec::new(),
            protos: Vec::new(),
            upval_names: if is_chunk { vec!["_ENV".to_string()] } else { Vec::new() },
            upvals: Vec::new(),
            scopes: vec![param_scope],
            captured,
            n_params,
            is_vararg: fb.is_vararg,
            free: n_params,
            n_regs: n_params.max(1),
        });
        // Captured parameters move into cells before any body code runs.
        for (i, p) in fb.params.iter().enumerate() {
            if self.cur().captured.contains(p) {
                self.emit(Instr::CellNew { reg: i as u16 });
            }
        }
        self.block(&fb.body)?;
        let fs = match self.funcs.pop() {
            Some(fs) => fs,
            None => unreachable!("function stack underflow"),
        };
        Ok(Arc::new(Proto {
            name: fs.name,
            consts: fs.consts,
            code: fs.code,
            n_regs: fs.n_regs,
            n_params: fs.n_params,
            is_vararg: fs.is_vararg,
            protos: fs.protos,
            upvals: fs.upvals,
        }))
    }

    /// Resolve `name` as an upvalue of function `fi`, installing capture
    /// specs down the chain as needed.
    fn resolve_upvalue(&mut self, fi: usize, name: &str) -> Result<Option<u16>> {
        if let Some(i) = self.funcs[fi].upval_names.iter().position(|n| n == name) {
            return Ok(Some(i as u16));
        }
        if fi == 0 {
            return Ok(None);
        }
        let parent = fi - 1;
        if let Some(r) = self.funcs[parent].resolve_local(name) {
            return Ok(Some(self.push_upval(fi, name, UpvalSpec::ParentCell(r))?));
        }
        if let Some(u) = self.resolve_upvalue(parent, name)? {
            return Ok(Some(self.push_upval(fi, name, UpvalSpec::ParentUpval(u))?));
        }
        Ok(None)
    }

    fn push_upval(&mut self, fi: usize, name: &str, spec: UpvalSpec) -> Result<u16> {
        let fs = &mut self.funcs[fi];
        ensure!(fs.upvals.len() < u16::MAX as usize, "too many upvalues in '{}'", fs.name);
        fs.upval_names.push(name.to_string());
        fs.upvals.push(spec);
        Ok((fs.upval_names.len() - 1) as u16)
    }

    fn block(&mut self, block: &Block) -> Result<()> {
        self.cur().scopes.push(Vec::new());
        let floor = self.cur().free;
        for stmt in block {
            self.stmt(stmt)?;
        }
        self.cur().scopes.pop();
        // Block locals die with the scope; their cells survive in any
        // closures that captured them.
        self.cur().free = floor;
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        let mark = self.cur().free;
        match stmt {
            Stmt::Local(names, exprs) => {
                // Locals keep their registers; no watermark rollback.
                return self.local_stmt(names, exprs);
            }
            Stmt::Assign(targets, exprs) => self.assign_stmt(targets, exprs)?,
            Stmt::If { arms, else_body } => self.if_stmt(arms, else_body.as_ref())?,
            Stmt::While(cond, body) => self.while_stmt(cond, body)?,
            Stmt::Do(body) => self.block(body)?,
            Stmt::Return(exprs) => self.return_stmt(exprs)?,
            Stmt::Expr(e) => {
                let r = self.cur().reserve()?;
                self.expr_to(e, r)?;
            }
        }
        self.cur().free = mark;
        Ok(())
    }

    fn local_stmt(&mut self, names: &[String], exprs: &[Expr]) -> Result<()> {
        ensure!(names.len() <= MAX_MULTI, "too many names in one declaration");
        let base = self.cur().free;
        for _ in names {
            self.cur().reserve()?;
        }
        self.spread_values(exprs, base, names.len())?;
        // Bind only now, so the right side saw the outer scope.
        for (i, name) in names.iter().enumerate() {
            let reg = base + i as u16;
            if self.cur().captured.contains(name) {
                self.emit(Instr::CellNew { reg });
            }
            if let Some(scope) = self.cur().scopes.last_mut() {
                scope.push((name.clone(), reg));
            }
        }
        Ok(())
    }

    fn assign_stmt(&mut self, targets: &[AssignTarget], exprs: &[Expr]) -> Result<()> {
        ensure!(targets.len() <= MAX_MULTI, "too many assignment targets");
        let fi = self.funcs.len() - 1;
        let mut prepared = Vec::with_capacity(targets.len());
        for target in targets {
            let p = match target {
                AssignTarget::Name(n) => {
                    if let Some(reg) = self.cur().resolve_local(n) {
                        let cell = self.cur().captured.contains(n);
                        Prepared::Local { reg, cell }
                    } else if let Some(u) = self.resolve_upvalue(fi, n)? {
                        Prepared::Upval(u)
                    } else {
                        // Global write: an index assignment on _ENV.
                        let obj = self.cur().reserve()?;
                        self.load_name("_ENV", obj)?;
                        let key = self.cur().reserve()?;
                        let idx = self.cur().add_const(Val::str(n))?;
                        self.emit(Instr::LoadConst { dst: key, idx });
                        Prepared::Indexed { obj, key }
                    }
                }
                AssignTarget::Index(o, k) => {
                    let obj = self.expr_temp(o)?;
                    let key = self.expr_temp(k)?;
                    Prepared::Indexed { obj, key }
                }
            };
            prepared.push(p);
        }
        let vbase = self.cur().free;
        for _ in targets {
            self.cur().reserve()?;
        }
        self.spread_values(exprs, vbase, targets.len())?;
        for (i, p) in prepared.into_iter().enumerate() {
            let src = vbase + i as u16;
            match p {
                Prepared::Local { reg, cell: true } => {
                    self.emit(Instr::CellSet { cell: reg, src });
                }
                Prepared::Local { reg, cell: false } => {
                    self.emit(Instr::Move { dst: reg, src });
                }
                Prepared::Upval(u) => {
                    self.emit(Instr::UpvalSet { upval: u, src });
                }
                Prepared::Indexed { obj, key } => {
                    self.emit(Instr::NewIndex { obj, key, src });
                }
            }
        }
        Ok(())
    }

    fn if_stmt(&mut self, arms: &[(Expr, Block)], else_body: Option<&Block>) -> Result<()> {
        let mut end_jumps = Vec::with_capacity(arms.len());
        for (cond, body) in arms {
            let mark = self.cur().free;
            let c = self.expr_temp(cond)?;
            let skip = self.emit(Instr::JumpIfFalse { cond: c, to: 0 });
            self.cur().free = mark;
            self.block(body)?;
            end_jumps.push(self.emit(Instr::Jump { to: 0 }));
            self.patch_jump(skip);
        }
        if let Some(body) = else_body {
            self.block(body)?;
        }
        for j in end_jumps {
            self.patch_jump(j);
        }
        Ok(())
    }

    fn while_stmt(&mut self, cond: &Expr, body: &Block) -> Result<()> {
        let start = self.cur().code.len() as u32;
        let mark = self.cur().free;
        let c = self.expr_temp(cond)?;
        let exit = self.emit(Instr::JumpIfFalse { cond: c, to: 0 });
        self.cur().free = mark;
        self.block(body)?;
        self.emit(Instr::Jump { to: start });
        self.patch_jump(exit);
        Ok(())
    }

    fn return_stmt(&mut self, exprs: &[Expr]) -> Result<()> {
        ensure!(exprs.len() <= MAX_MULTI, "too many return values");
        match exprs {
            [] => {
                self.emit(Instr::Return { base: 0, n: 0 });
            }
            [only @ Expr::Call(..)] => {
                self.call_expr(only, 0, RESULTS_IN_SINK)?;
                self.emit(Instr::ReturnSink);
            }
            [Expr::Vararg] => {
                ensure!(self.cur().is_vararg, "cannot use '...' outside a vararg function");
                self.emit(Instr::VarargSink);
                self.emit(Instr::ReturnSink);
            }
            _ => {
                let tail_multi = matches!(exprs.last(), Some(Expr::Call(..) | Expr::Vararg));
                let base = self.cur().free;
                let n_fixed = if tail_multi { exprs.len() - 1 } else { exprs.len() };
                for e in &exprs[..n_fixed] {
                    let r = self.cur().reserve()?;
                    self.expr_to(e, r)?;
                }
                if tail_multi {
                    self.tail_into_sink(&exprs[n_fixed])?;
                    self.emit(Instr::ReturnWithSink { base, n: n_fixed as u8 });
                } else {
                    self.emit(Instr::Return { base, n: n_fixed as u8 });
                }
            }
        }
        Ok(())
    }

    /// Lower a trailing multi-value expression so its results end up in
    /// the sink.
    fn tail_into_sink(&mut self, e: &Expr) -> Result<()> {
        match e {
            Expr::Call(..) => self.call_expr(e, 0, RESULTS_IN_SINK),
            Expr::Vararg => {
                ensure!(self.cur().is_vararg, "cannot use '...' outside a vararg function");
                self.emit(Instr::VarargSink);
                Ok(())
            }
            other => bail!("not a multi-value expression: {other:?}"),
        }
    }

    /// Evaluate `exprs` into `want` consecutive registers at `base`,
    /// nil-padding and expanding a trailing call or `...` as needed.
    /// Surplus expressions are still evaluated for their effects.
    fn spread_values(&mut self, exprs: &[Expr], base: u16, want: usize) -> Result<()> {
        ensure!(exprs.len() <= MAX_MULTI, "too many values at one site");
        if exprs.is_empty() {
            for i in 0..want {
                self.emit(Instr::LoadNil { dst: base + i as u16 });
            }
            return Ok(());
        }
        let last = exprs.len() - 1;
        for (i, e) in exprs[..last].iter().enumerate() {
            if i < want {
                self.expr_to(e, base + i as u16)?;
            } else {
                let mark = self.cur().free;
                self.expr_temp(e)?;
                self.cur().free = mark;
            }
        }
        let remaining = want.saturating_sub(last);
        match &exprs[last] {
            Expr::Call(..) if last < want => {
                self.call_expr(&exprs[last], base + last as u16, remaining as u8)?;
            }
            Expr::Vararg if last < want => {
                ensure!(self.cur().is_vararg, "cannot use '...' outside a vararg function");
                self.emit(Instr::Vararg { dst: base + last as u16, count: remaining as u8 });
            }
            e if last < want => {
                self.expr_to(e, base + last as u16)?;
                for i in exprs.len()..want {
                    self.emit(Instr::LoadNil { dst: base + i as u16 });
                }
            }
            e => {
                let mark = self.cur().free;
                self.expr_temp(e)?;
                self.cur().free = mark;
            }
        }
        Ok(())
    }

    fn expr_temp(&mut self, e: &Expr) -> Result<u16> {
        let r = self.cur().reserve()?;
        self.expr_to(e, r)?;
        Ok(r)
    }

    fn expr_to(&mut self, e: &Expr, dst: u16) -> Result<()> {
        match e {
            Expr::Nil => {
                self.emit(Instr::LoadNil { dst });
            }
            Expr::True => {
                self.emit(Instr::LoadBool { dst, value: true });
            }
            Expr::False => {
                self.emit(Instr::LoadBool { dst, value: false });
            }
            Expr::Int(i) => {
                let idx = self.cur().add_const(Val::Int(*i))?;
                self.emit(Instr::LoadConst { dst, idx });
            }
            Expr::Float(x) => {
                let idx = self.cur().add_const(Val::Float(*x))?;
                self.emit(Instr::LoadConst { dst, idx });
            }
            Expr::Str(s) => {
                let idx = self.cur().add_const(Val::str(s))?;
                self.emit(Instr::LoadConst { dst, idx });
            }
            Expr::Vararg => {
                ensure!(self.cur().is_vararg, "cannot use '...' outside a vararg function");
                self.emit(Instr::Vararg { dst, count: 1 });
            }
            Expr::Name(n) => self.load_name(n, dst)?,
            Expr::Un(op, inner) => {
                self.expr_to(inner, dst)?;
                match op {
                    UnOp::Not => self.emit(Instr::Not { dst, src: dst }),
                    UnOp::Neg => self.emit(Instr::Neg { dst, src: dst }),
                    UnOp::Len => self.emit(Instr::Len { dst, src: dst }),
                };
            }
            Expr::Bin(lhs, op, rhs) => self.bin_expr(lhs, *op, rhs, dst)?,
            Expr::Index(obj, key) => {
                let mark = self.cur().free;
                let o = self.expr_temp(obj)?;
                let k = self.expr_temp(key)?;
                self.emit(Instr::Index { dst, obj: o, key: k });
                self.cur().free = mark;
            }
            Expr::Call(..) => self.call_expr(e, dst, 1)?,
            Expr::Function(fb) => {
                let name: Arc<str> = match &fb.name {
                    Some(n) => Arc::from(n.as_str()),
                    None => Arc::from("<anonymous>"),
                };
                let proto = self.function(fb, name, false)?;
                let fs = self.cur();
                ensure!(fs.protos.len() < u16::MAX as usize, "too many nested functions in '{}'", fs.name);
                fs.protos.push(proto);
                let idx = (fs.protos.len() - 1) as u16;
                self.emit(Instr::MakeClosure { dst, proto: idx });
            }
            Expr::Table(items) => {
                self.emit(Instr::NewTable { dst });
                let mut next_index = 1i64;
                for item in items {
                    let mark = self.cur().free;
                    match item {
                        TableItem::Pair(k, v) => {
                            let key = self.expr_temp(k)?;
                            let src = self.expr_temp(v)?;
                            self.emit(Instr::NewIndex { obj: dst, key, src });
                        }
                        TableItem::Item(v) => {
                            let key = self.cur().reserve()?;
                            let idx = self.cur().add_const(Val::Int(next_index))?;
                            self.emit(Instr::LoadConst { dst: key, idx });
                            let src = self.expr_temp(v)?;
                            self.emit(Instr::NewIndex { obj: dst, key, src });
                            next_index += 1;
                        }
                    }
                    self.cur().free = mark;
                }
            }
        }
        Ok(())
    }

    fn bin_expr(&mut self, lhs: &Expr, op: BinOp, rhs: &Expr, dst: u16) -> Result<()> {
        match op {
            // `and`/`or` are control flow: the right side only runs when
            // the left doesn't decide the result.
            BinOp::And => {
                self.expr_to(lhs, dst)?;
                let skip = self.emit(Instr::JumpIfFalse { cond: dst, to: 0 });
                self.expr_to(rhs, dst)?;
                self.patch_jump(skip);
            }
            BinOp::Or => {
                self.expr_to(lhs, dst)?;
                let skip = self.emit(Instr::JumpIfTrue { cond: dst, to: 0 });
                self.expr_to(rhs, dst)?;
                self.patch_jump(skip);
            }
            BinOp::Arith(aop) => {
                let mark = self.cur().free;
                let l = self.expr_temp(lhs)?;
                let r = self.expr_temp(rhs)?;
                self.emit(Instr::Arith { op: aop, dst, lhs: l, rhs: r });
                self.cur().free = mark;
            }
            BinOp::Cmp(cop) => {
                let mark = self.cur().free;
                let l = self.expr_temp(lhs)?;
                let r = self.expr_temp(rhs)?;
                self.emit(Instr::Compare { op: cop, dst, lhs: l, rhs: r });
                self.cur().free = mark;
            }
            BinOp::Concat => {
                let mark = self.cur().free;
                let l = self.expr_temp(lhs)?;
                let r = self.expr_temp(rhs)?;
                self.emit(Instr::Concat { dst, lhs: l, rhs: r });
                self.cur().free = mark;
            }
        }
        Ok(())
    }

    fn load_name(&mut self, name: &str, dst: u16) -> Result<()> {
        if let Some(r) = self.cur().resolve_local(name) {
            if self.cur().captured.contains(name) {
                self.emit(Instr::CellGet { dst, cell: r });
            } else if r != dst {
                self.emit(Instr::Move { dst, src: r });
            }
            return Ok(());
        }
        let fi = self.funcs.len() - 1;
        if let Some(u) = self.resolve_upvalue(fi, name)? {
            self.emit(Instr::UpvalGet { dst, upval: u });
            return Ok(());
        }
        // A free name is a global: _ENV[name].
        ensure!(name != "_ENV", "'_ENV' is not in scope");
        let mark = self.cur().free;
        let obj = self.cur().reserve()?;
        self.load_name("_ENV", obj)?;
        let key = self.cur().reserve()?;
        let idx = self.cur().add_const(Val::str(name))?;
        self.emit(Instr::LoadConst { dst: key, idx });
        self.emit(Instr::Index { dst, obj, key });
        self.cur().free = mark;
        Ok(())
    }

    /// Lower a call. `n_results` of `RESULTS_IN_SINK` leaves all results
    /// in the sink for a following sink-consuming instruction.
    fn call_expr(&mut self, e: &Expr, dst: u16, n_results: u8) -> Result<()> {
        let Expr::Call(f, args) = e else {
            bail!("not a call expression: {e:?}");
        };
        ensure!(args.len() <= MAX_MULTI, "too many arguments in one call");
        let mark = self.cur().free;
        let func = self.expr_temp(f)?;
        let base = self.cur().free;
        let tail_multi = matches!(args.last(), Some(Expr::Call(..) | Expr::Vararg));
        let n_fixed = if tail_multi { args.len() - 1 } else { args.len() };
        for a in &args[..n_fixed] {
            let r = self.cur().reserve()?;
            self.expr_to(a, r)?;
        }
        if tail_multi {
            self.tail_into_sink(&args[n_fixed])?;
            self.emit(Instr::CallWithSink {
                func,
                base,
                n_fixed: n_fixed as u8,
                dst,
                n_results,
            });
        } else {
            self.emit(Instr::Call {
                func,
                base,
                n_args: n_fixed as u8,
                dst,
                n_results,
            });
        }
        self.cur().free = mark;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Stmt;

    fn chunk(body: Vec<Stmt>) -> FuncBody {
        FuncBody::chunk(body)
    }

    #[test]
    fn empty_chunk_compiles() {
        let proto = compile_chunk(&chunk(vec![]), "empty").unwrap();
        assert!(proto.code.is_empty());
        assert!(proto.upvals.is_empty());
    }

    #[test]
    fn global_read_lowers_to_env_index() {
        let proto = compile_chunk(
            &chunk(vec![Stmt::Return(vec![Expr::name("x")])]),
            "g",
        )
        .unwrap();
        assert!(proto.code.iter().any(|i| matches!(i, Instr::UpvalGet { upval: 0, .. })));
        assert!(proto.code.iter().any(|i| matches!(i, Instr::Index { .. })));
    }

    #[test]
    fn captured_local_gets_a_cell() {
        let body = vec![
            Stmt::Local(vec!["x".into()], vec![Expr::Int(1)]),
            Stmt::Return(vec![Expr::Function(FuncBody {
                params: vec![],
                is_vararg: false,
                body: vec![Stmt::Return(vec![Expr::name("x")])],
                name: None,
            })]),
        ];
        let proto = compile_chunk(&chunk(body), "cap").unwrap();
        assert!(proto.code.iter().any(|i| matches!(i, Instr::CellNew { .. })));
        let inner = &proto.protos[0];
        assert!(matches!(inner.upvals[..], [UpvalSpec::ParentCell(_)]));
    }

    #[test]
    fn uncaptured_local_stays_a_plain_register() {
        let body = vec![
            Stmt::Local(vec!["x".into()], vec![Expr::Int(1)]),
            Stmt::Return(vec![Expr::name("x")]),
        ];
        let proto = compile_chunk(&chunk(body), "plain").unwrap();
        assert!(!proto.code.iter().any(|i| matches!(i, Instr::CellNew { .. })));
    }

    #[test]
    fn vararg_outside_vararg_function_is_rejected() {
        let body = vec![Stmt::Return(vec![Expr::Function(FuncBody {
            params: vec![],
            is_vararg: false,
            body: vec![Stmt::Return(vec![Expr::Vararg])],
            name: None,
        })])];
        assert!(compile_chunk(&chunk(body), "bad").is_err());
    }

    #[test]
    fn tail_call_in_return_uses_the_sink() {
        let body = vec![Stmt::Return(vec![Expr::call(Expr::name("f"), vec![])])];
        let proto = compile_chunk(&chunk(body), "tail").unwrap();
        assert!(proto.code.iter().any(
            |i| matches!(i, Instr::Call { n_results: RESULTS_IN_SINK, .. })
        ));
        assert!(matches!(proto.code.last(), Some(Instr::ReturnSink)));
    }

    #[test]
    fn int_and_float_constants_stay_distinct() {
        let body = vec![Stmt::Return(vec![Expr::Int(1), Expr::Float(1.0)])];
        let proto = compile_chunk(&chunk(body), "consts").unwrap();
        assert_eq!(proto.consts.len(), 2);
    }
}
