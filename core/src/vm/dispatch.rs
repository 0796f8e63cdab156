//! Operator and call resolution.
//!
//! Every operation tries its built-in fast path first, then the operand's
//! metatable, then fails with a type error naming the operation and the
//! operand's dynamic type. Binary operations consult the left operand's
//! metatable before the right's.
//!
//! Metamethod invocations route through `ExecContext::call`, so any of
//! these operations can suspend mid-flight; each public entry therefore
//! starts by finishing a pending chain frame when one is being replayed,
//! then applies the same result shaping as the fresh path.

use std::sync::Arc;

use tracing::trace;

use crate::op::{ArithOp, CmpOp};
use crate::val::{Table, Val, ops};

use super::context::ExecContext;
use super::control::{Control, Flow};

/// Metamethod names.
pub mod meta {
    pub const INDEX: &str = "__index";
    pub const NEWINDEX: &str = "__newindex";
    pub const CALL: &str = "__call";
    pub const EQ: &str = "__eq";
    pub const LT: &str = "__lt";
    pub const LE: &str = "__le";
    pub const CONCAT: &str = "__concat";
    pub const LEN: &str = "__len";
    pub const UNM: &str = "__unm";
    pub const TOSTRING: &str = "__tostring";
    pub const METATABLE: &str = "__metatable";
}

/// Bound on `__index`/`__newindex` table-hop chains.
const MAX_META_DEPTH: usize = 100;

/// The metatable governing a value: tables and userdata carry their own,
/// other types share a per-type metatable from the runtime services.
pub fn metatable_of(ctx: &ExecContext, v: &Val) -> Option<Arc<Table>> {
    match v {
        Val::Table(t) => t.metatable(),
        Val::Userdata(u) => u.metatable(),
        other => ctx.services().type_metatable(other.type_name()),
    }
}

/// Look up a metamethod; nil entries count as absent.
pub fn get_metamethod(ctx: &ExecContext, v: &Val, name: &str) -> Option<Val> {
    let mt = metatable_of(ctx, v)?;
    let mm = mt.get_str(name);
    if mm.is_nil() { None } else { Some(mm) }
}

fn binary_metamethod(ctx: &ExecContext, a: &Val, b: &Val, name: &str) -> Option<Val> {
    get_metamethod(ctx, a, name).or_else(|| get_metamethod(ctx, b, name))
}

fn type_error(operation: &str, operand: &Val) -> Control {
    Control::error(format!("attempt to {operation} a {} value", operand.type_name()))
}

/// Invoke `target` with `args`. Results land in the return sink.
pub fn call(ctx: &mut ExecContext, target: &Val, args: &[Val]) -> Flow {
    match target {
        Val::Func(f) => Arc::clone(f).invoke(ctx, args),
        other => match get_metamethod(ctx, other, meta::CALL) {
            Some(mm) => {
                trace!(ty = other.type_name(), "routing call through __call");
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(other.clone());
                full.extend_from_slice(args);
                call(ctx, &mm, &full)
            }
            None => Err(type_error("call", other)),
        },
    }
}

/// Binary arithmetic: numeric fast path, then `__add` and friends on the
/// left operand, then the right.
pub fn arith(ctx: &mut ExecContext, op: ArithOp, a: &Val, b: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    match ops::raw_arith(op, a, b) {
        Ok(Some(v)) => {
            ctx.sink_mut().set_single(v);
            Ok(())
        }
        Ok(None) => match binary_metamethod(ctx, a, b, op.metamethod()) {
            Some(mm) => {
                trace!(op = %op, "arith metamethod dispatch");
                ctx.call(&mm, &[a.clone(), b.clone()])?;
                ctx.sink_mut().keep_first();
                Ok(())
            }
            None => {
                let offender = if matches!(a, Val::Int(_) | Val::Float(_)) { b } else { a };
                Err(type_error(&format!("perform arithmetic ({op}) on"), offender))
            }
        },
        Err(e) => Err(Control::error(e.to_string())),
    }
}

/// Unary minus: numeric fast path, then `__unm`.
pub fn neg(ctx: &mut ExecContext, v: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    if let Some(out) = ops::raw_neg(v) {
        ctx.sink_mut().set_single(out);
        return Ok(());
    }
    match get_metamethod(ctx, v, meta::UNM) {
        Some(mm) => {
            ctx.call(&mm, &[v.clone(), v.clone()])?;
            ctx.sink_mut().keep_first();
            Ok(())
        }
        None => Err(type_error("perform arithmetic (-) on", v)),
    }
}

/// Length: raw string length, `__len` for everything with one, table
/// border as the table fallback.
pub fn len(ctx: &mut ExecContext, v: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    if let Val::Str(s) = v {
        ctx.sink_mut().set_single(Val::Int(s.len() as i64));
        return Ok(());
    }
    if let Some(mm) = get_metamethod(ctx, v, meta::LEN) {
        ctx.call(&mm, &[v.clone()])?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    match v {
        Val::Table(t) => {
            ctx.sink_mut().set_single(Val::Int(t.raw_len()));
            Ok(())
        }
        other => Err(type_error("get length of", other)),
    }
}

/// Comparison. `Ne`/`Gt`/`Ge` rewrite onto `Eq`/`Lt`/`Le`; `__eq` is only
/// consulted when both operands are tables or both userdata and raw
/// equality already failed.
pub fn compare(ctx: &mut ExecContext, op: CmpOp, a: &Val, b: &Val) -> Flow {
    let negate = matches!(op, CmpOp::Ne);
    if ctx.replaying() {
        ctx.continue_pending()?;
        let truth = ctx.sink().first().truthy();
        ctx.sink_mut().set_single(Val::Bool(truth != negate));
        return Ok(());
    }
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            if ops::raw_eq(a, b) {
                ctx.sink_mut().set_single(Val::Bool(!negate));
                return Ok(());
            }
            let both_tables = matches!((a, b), (Val::Table(_), Val::Table(_)));
            let both_userdata = matches!((a, b), (Val::Userdata(_), Val::Userdata(_)));
            if both_tables || both_userdata {
                if let Some(mm) = binary_metamethod(ctx, a, b, meta::EQ) {
                    ctx.call(&mm, &[a.clone(), b.clone()])?;
                    let truth = ctx.sink().first().truthy();
                    ctx.sink_mut().set_single(Val::Bool(truth != negate));
                    return Ok(());
                }
            }
            ctx.sink_mut().set_single(Val::Bool(negate));
            Ok(())
        }
        CmpOp::Lt => order(ctx, a, b, ops::raw_lt, meta::LT),
        CmpOp::Le => order(ctx, a, b, ops::raw_le, meta::LE),
        CmpOp::Gt => order(ctx, b, a, ops::raw_lt, meta::LT),
        CmpOp::Ge => order(ctx, b, a, ops::raw_le, meta::LE),
    }
}

fn order(
    ctx: &mut ExecContext,
    a: &Val,
    b: &Val,
    raw: fn(&Val, &Val) -> Option<bool>,
    mm_name: &str,
) -> Flow {
    if let Some(result) = raw(a, b) {
        ctx.sink_mut().set_single(Val::Bool(result));
        return Ok(());
    }
    match binary_metamethod(ctx, a, b, mm_name) {
        Some(mm) => {
            ctx.call(&mm, &[a.clone(), b.clone()])?;
            let truth = ctx.sink().first().truthy();
            ctx.sink_mut().set_single(Val::Bool(truth));
            Ok(())
        }
        None => Err(Control::error(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Concatenation: string/number coercion, then `__concat` left-to-right.
pub fn concat(ctx: &mut ExecContext, a: &Val, b: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    if let Some(v) = ops::raw_concat(a, b) {
        ctx.sink_mut().set_single(v);
        return Ok(());
    }
    match binary_metamethod(ctx, a, b, meta::CONCAT) {
        Some(mm) => {
            ctx.call(&mm, &[a.clone(), b.clone()])?;
            ctx.sink_mut().keep_first();
            Ok(())
        }
        None => {
            let offender = if ops::coerce_to_str(a).is_some() { b } else { a };
            Err(type_error("concatenate", offender))
        }
    }
}

/// Read `obj[key]`: present table key is the fast path; otherwise follow
/// `__index`, which may be a function (called) or a table (re-dispatched,
/// depth-limited).
pub fn index(ctx: &mut ExecContext, obj: &Val, key: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    let mut cur = obj.clone();
    for _ in 0..MAX_META_DEPTH {
        let mm = match &cur {
            Val::Table(t) => {
                let raw = t.raw_get(key);
                if !raw.is_nil() {
                    ctx.sink_mut().set_single(raw);
                    return Ok(());
                }
                match get_metamethod(ctx, &cur, meta::INDEX) {
                    Some(mm) => mm,
                    None => {
                        ctx.sink_mut().set_single(Val::Nil);
                        return Ok(());
                    }
                }
            }
            other => match get_metamethod(ctx, other, meta::INDEX) {
                Some(mm) => mm,
                None => return Err(type_error("index", other)),
            },
        };
        match mm {
            Val::Func(_) => {
                ctx.call(&mm, &[cur, key.clone()])?;
                ctx.sink_mut().keep_first();
                return Ok(());
            }
            next => cur = next,
        }
    }
    Err(Control::error("'__index' chain too long; possible loop"))
}

/// Write `obj[key] = value`. A present raw key or an absent `__newindex`
/// writes raw; a function handler is called; a table handler re-dispatches.
pub fn newindex(ctx: &mut ExecContext, obj: &Val, key: &Val, value: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().clear();
        return Ok(());
    }
    let mut cur = obj.clone();
    for _ in 0..MAX_META_DEPTH {
        let mm = match &cur {
            Val::Table(t) => {
                let handler = if t.raw_get(key).is_nil() {
                    get_metamethod(ctx, &cur, meta::NEWINDEX)
                } else {
                    None
                };
                match handler {
                    Some(mm) => mm,
                    None => {
                        t.raw_set(key, value.clone())
                            .map_err(|e| Control::error(e.to_string()))?;
                        ctx.sink_mut().clear();
                        return Ok(());
                    }
                }
            }
            other => match get_metamethod(ctx, other, meta::NEWINDEX) {
                Some(mm) => mm,
                None => return Err(type_error("index", other)),
            },
        };
        match mm {
            Val::Func(_) => {
                ctx.call(&mm, &[cur, key.clone(), value.clone()])?;
                ctx.sink_mut().clear();
                return Ok(());
            }
            next => cur = next,
        }
    }
    Err(Control::error("'__newindex' chain too long; possible loop"))
}

/// String rendition: `__tostring` wins, otherwise the built-in `Display`.
pub fn tostring(ctx: &mut ExecContext, v: &Val) -> Flow {
    if ctx.replaying() {
        ctx.continue_pending()?;
        ctx.sink_mut().keep_first();
        return Ok(());
    }
    match get_metamethod(ctx, v, meta::TOSTRING) {
        Some(mm) => {
            ctx.call(&mm, &[v.clone()])?;
            ctx.sink_mut().keep_first();
            match ctx.sink().first() {
                Val::Str(_) => Ok(()),
                other => Err(Control::error(format!(
                    "'__tostring' must return a string (got {})",
                    other.type_name()
                ))),
            }
        }
        None => {
            ctx.sink_mut().set_single(Val::str(v.to_string()));
            Ok(())
        }
    }
}
