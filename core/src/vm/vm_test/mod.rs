//! End-to-end engine tests: chunks built as surface trees, compiled, and
//! executed through the public entry points.

mod exec_test;
mod pcall_test;

use std::sync::Arc;

use crate::ast::{Block, Expr, FuncBody, Stmt};
use crate::op::{ArithOp, BinOp, CmpOp};
use crate::val::{Table, Val};

use super::{
    ExecContext, Outcome, Preemption, RuntimeServices, chunk_closure, compile_chunk, new_env,
};

pub(crate) fn chunk_fn(body: Block, env: Arc<Table>) -> Val {
    let proto = compile_chunk(&FuncBody::chunk(body), "main").unwrap();
    chunk_closure(proto, env)
}

pub(crate) fn eval_in(body: Block, env: Arc<Table>, ctx: &mut ExecContext) -> Vec<Val> {
    let f = chunk_fn(body, env);
    match ctx.start(&f, &[]).unwrap() {
        Outcome::Done(values) => values,
        Outcome::Suspended(s) => panic!("unexpected suspension: {s:?}"),
    }
}

/// Compile and run a chunk against a fresh default environment.
pub(crate) fn eval(body: Block) -> Vec<Val> {
    let mut ctx = ExecContext::default();
    eval_in(body, new_env(), &mut ctx)
}

/// Run a chunk expected to fail; returns the rendered error.
pub(crate) fn eval_err(body: Block) -> String {
    let f = chunk_fn(body, new_env());
    let mut ctx = ExecContext::default();
    match ctx.start(&f, &[]) {
        Err(e) => e.to_string(),
        Ok(out) => panic!("expected an error, got {out:?}"),
    }
}

/// A context whose type metatables don't leak into other tests.
pub(crate) fn isolated_ctx(preempt: Preemption) -> ExecContext {
    ExecContext::new(Arc::new(RuntimeServices::default()), preempt)
}

// -- surface-tree shorthand --

pub(crate) fn local(name: &str, e: Expr) -> Stmt {
    Stmt::Local(vec![name.to_string()], vec![e])
}

pub(crate) fn assign(name: &str, e: Expr) -> Stmt {
    Stmt::Assign(vec![crate::ast::AssignTarget::Name(name.to_string())], vec![e])
}

pub(crate) fn ret(exprs: Vec<Expr>) -> Stmt {
    Stmt::Return(exprs)
}

pub(crate) fn add(l: Expr, r: Expr) -> Expr {
    Expr::bin(l, BinOp::Arith(ArithOp::Add), r)
}

pub(crate) fn mul(l: Expr, r: Expr) -> Expr {
    Expr::bin(l, BinOp::Arith(ArithOp::Mul), r)
}

pub(crate) fn lt(l: Expr, r: Expr) -> Expr {
    Expr::bin(l, BinOp::Cmp(CmpOp::Lt), r)
}

pub(crate) fn func(params: &[&str], body: Block) -> Expr {
    Expr::Function(FuncBody {
        params: params.iter().map(|p| p.to_string()).collect(),
        is_vararg: false,
        body,
        name: None,
    })
}

pub(crate) fn vararg_func(params: &[&str], body: Block) -> Expr {
    Expr::Function(FuncBody {
        params: params.iter().map(|p| p.to_string()).collect(),
        is_vararg: true,
        body,
        name: None,
    })
}

pub(crate) fn call(f: &str, args: Vec<Expr>) -> Expr {
    Expr::call(Expr::name(f), args)
}
