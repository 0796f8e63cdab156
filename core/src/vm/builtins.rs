//! The engine-defined globals: protected calls, explicit yield and the
//! minimal introspection set. Everything here goes through the same
//! dispatch and call-boundary machinery as compiled code.

use std::sync::Arc;

use crate::val::{Table, Val, ops};

use super::closure::{Callable, NativeFunction};
use super::context::ExecContext;
use super::control::{Control, Flow, LuaError, SavedFrame, SavedState, Suspension};
use super::dispatch;

/// `pcall(f, ...)`. Resumable: when the protected region suspends, this
/// wrapper joins the snapshot chain so the protection still holds after
/// the chain is resumed.
pub struct ProtectedCall;

impl ProtectedCall {
    pub fn function() -> Val {
        Val::Func(Arc::new(ProtectedCall))
    }

    fn protect(self: &Arc<Self>, ctx: &mut ExecContext, flow: Flow) -> Flow {
        match flow {
            Ok(()) => {
                ctx.sink_mut().prepend(Val::Bool(true));
                Ok(())
            }
            Err(Control::Error(e)) => {
                ctx.sink_mut().set_to(vec![Val::Bool(false), e.value]);
                Ok(())
            }
            Err(Control::Suspend(mut s)) => {
                s.chain.push(SavedFrame::Frame {
                    callee: Arc::clone(self) as Arc<dyn Callable>,
                    state: SavedState::empty(0),
                });
                Err(Control::Suspend(s))
            }
            fatal @ Err(Control::Fatal(_)) => fatal,
        }
    }
}

impl Callable for ProtectedCall {
    fn invoke(self: Arc<Self>, ctx: &mut ExecContext, args: &[Val]) -> Flow {
        let (target, rest) = match args.split_first() {
            Some(split) => split,
            None => return Err(Control::error("bad argument #1 to 'pcall' (value expected)")),
        };
        let flow = ctx.call(target, rest);
        self.protect(ctx, flow)
    }

    fn resume(self: Arc<Self>, ctx: &mut ExecContext, state: SavedState) -> Flow {
        if state.point != 0 || !state.registers.is_empty() {
            return Err(Control::fatal("invalid resume state for 'pcall'"));
        }
        let flow = ctx.continue_pending();
        self.protect(ctx, flow)
    }

    fn name(&self) -> &str {
        "pcall"
    }
}

fn arg(args: &[Val], n: usize) -> Val {
    args.get(n).cloned().unwrap_or(Val::Nil)
}

fn check_table(args: &[Val], n: usize, fname: &str) -> Result<Arc<Table>, Control> {
    match args.get(n) {
        Some(Val::Table(t)) => Ok(Arc::clone(t)),
        other => Err(Control::error(format!(
            "bad argument #{} to '{}' (table expected, got {})",
            n + 1,
            fname,
            other.map_or("no value", Val::type_name)
        ))),
    }
}

fn error_fn(_ctx: &mut ExecContext, args: &[Val]) -> Flow {
    Err(Control::Error(LuaError::new(arg(args, 0))))
}

fn yield_fn(_ctx: &mut ExecContext, args: &[Val]) -> Flow {
    Err(Control::Suspend(Suspension::yielded(args.to_vec())))
}

fn type_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    ctx.sink_mut().set_single(Val::str(arg(args, 0).type_name()));
    Ok(())
}

fn tostring_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    dispatch::tostring(ctx, &arg(args, 0))
}

fn setmetatable_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    let t = check_table(args, 0, "setmetatable")?;
    let meta = match arg(args, 1) {
        Val::Nil => None,
        Val::Table(m) => Some(m),
        other => {
            return Err(Control::error(format!(
                "bad argument #2 to 'setmetatable' (nil or table expected, got {})",
                other.type_name()
            )));
        }
    };
    if let Some(current) = t.metatable() {
        if !current.get_str(dispatch::meta::METATABLE).is_nil() {
            return Err(Control::error("cannot change a protected metatable"));
        }
    }
    t.set_metatable(meta);
    ctx.sink_mut().set_single(Val::Table(t));
    Ok(())
}

fn getmetatable_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    let v = arg(args, 0);
    let out = match dispatch::metatable_of(ctx, &v) {
        Some(mt) => {
            let guard = mt.get_str(dispatch::meta::METATABLE);
            if guard.is_nil() { Val::Table(mt) } else { guard }
        }
        None => Val::Nil,
    };
    ctx.sink_mut().set_single(out);
    Ok(())
}

fn rawget_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    let t = check_table(args, 0, "rawget")?;
    ctx.sink_mut().set_single(t.raw_get(&arg(args, 1)));
    Ok(())
}

fn rawset_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    let t = check_table(args, 0, "rawset")?;
    t.raw_set(&arg(args, 1), arg(args, 2))
        .map_err(|e| Control::error(e.to_string()))?;
    ctx.sink_mut().set_single(Val::Table(t));
    Ok(())
}

fn rawequal_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    let eq = ops::raw_eq(&arg(args, 0), &arg(args, 1));
    ctx.sink_mut().set_single(Val::Bool(eq));
    Ok(())
}

fn rawlen_fn(ctx: &mut ExecContext, args: &[Val]) -> Flow {
    let len = match arg(args, 0) {
        Val::Table(t) => t.raw_len(),
        Val::Str(s) => s.len() as i64,
        other => {
            return Err(Control::error(format!(
                "table or string expected, got {}",
                other.type_name()
            )));
        }
    };
    ctx.sink_mut().set_single(Val::Int(len));
    Ok(())
}

/// A fresh global table pre-populated with the engine-defined functions.
/// Hosts extend it before handing it to `chunk_closure` as `_ENV`.
pub fn new_env() -> Arc<Table> {
    let env = Table::new();
    env.set_str("pcall", ProtectedCall::function());
    env.set_str("error", NativeFunction::new("error", error_fn));
    env.set_str("yield", NativeFunction::new("yield", yield_fn));
    env.set_str("type", NativeFunction::new("type", type_fn));
    env.set_str("tostring", NativeFunction::new("tostring", tostring_fn));
    env.set_str("setmetatable", NativeFunction::new("setmetatable", setmetatable_fn));
    env.set_str("getmetatable", NativeFunction::new("getmetatable", getmetatable_fn));
    env.set_str("rawget", NativeFunction::new("rawget", rawget_fn));
    env.set_str("rawset", NativeFunction::new("rawset", rawset_fn));
    env.set_str("rawequal", NativeFunction::new("rawequal", rawequal_fn));
    env.set_str("rawlen", NativeFunction::new("rawlen", rawlen_fn));
    env.set_str("_G", Val::Table(Arc::clone(&env)));
    env
}
