//! Coroutines: independent call chains with their own execution context.
//!
//! The engine schedules nothing. `resume` runs the body synchronously on
//! the caller's thread until it returns, yields, or is preempted; the
//! suspension lives inside the coroutine until the next resume. Dropping
//! a suspended coroutine reclaims the chain with no other cleanup.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use tracing::debug;

use crate::val::Val;
use crate::vm::{ExecContext, Outcome, Preemption, RuntimeServices, SuspendReason, Suspension};

/// What a resume produced.
#[derive(Debug)]
pub enum CoOutcome {
    /// The body called `yield` with these values.
    Yielded(Vec<Val>),
    /// The preemption policy forced a suspension; resume again to proceed.
    Preempted,
    /// The body returned; the coroutine is dead.
    Returned(Vec<Val>),
}

/// Host-visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    NotStarted,
    Suspended,
    Running,
    Dead,
}

enum State {
    NotStarted,
    Suspended(Suspension),
    /// Placeholder while the body runs; also what an error leaves behind
    /// until the status is settled.
    Running,
    Dead,
}

struct CoInner {
    ctx: ExecContext,
    state: State,
}

pub struct Coroutine {
    body: Val,
    inner: Mutex<CoInner>,
}

impl Coroutine {
    pub fn new(body: Val, services: Arc<RuntimeServices>, preempt: Preemption) -> Arc<Coroutine> {
        Arc::new(Coroutine {
            body,
            inner: Mutex::new(CoInner {
                ctx: ExecContext::new(services, preempt),
                state: State::NotStarted,
            }),
        })
    }

    /// Run the body until it returns, yields, or is preempted. `args` are
    /// the body's arguments on the first resume and the results of the
    /// in-flight `yield` afterwards.
    ///
    /// Resuming a dead or currently running coroutine is host misuse and
    /// an error; a body error kills the coroutine and surfaces here.
    pub fn resume(&self, args: Vec<Val>) -> Result<CoOutcome> {
        let mut inner = self
            .inner
            .try_lock()
            .map_err(|_| anyhow!("cannot resume a running coroutine"))?;
        let state = std::mem::replace(&mut inner.state, State::Running);
        let outcome = match state {
            State::NotStarted => inner.ctx.start(&self.body, &args),
            State::Suspended(s) => inner.ctx.resume(s, args),
            State::Running => {
                // A previous resume never settled; treat as dead.
                inner.state = State::Dead;
                bail!("coroutine is in a broken state");
            }
            State::Dead => {
                inner.state = State::Dead;
                bail!("cannot resume a dead coroutine");
            }
        };
        match outcome {
            Ok(Outcome::Done(values)) => {
                inner.state = State::Dead;
                Ok(CoOutcome::Returned(values))
            }
            Ok(Outcome::Suspended(s)) => match s.reason() {
                SuspendReason::Yield => {
                    let values = s.values().to_vec();
                    inner.state = State::Suspended(s);
                    Ok(CoOutcome::Yielded(values))
                }
                SuspendReason::Preempted => {
                    inner.state = State::Suspended(s);
                    Ok(CoOutcome::Preempted)
                }
            },
            Err(e) => {
                debug!(error = %e, "coroutine body failed");
                inner.state = State::Dead;
                Err(e)
            }
        }
    }

    /// The coroutine as a script-visible value.
    pub fn to_val(self: &Arc<Self>) -> Val {
        Val::Thread(Arc::clone(self))
    }

    pub fn status(&self) -> CoStatus {
        match self.inner.try_lock() {
            Err(_) => CoStatus::Running,
            Ok(inner) => match inner.state {
                State::NotStarted => CoStatus::NotStarted,
                State::Suspended(_) => CoStatus::Suspended,
                State::Running => CoStatus::Running,
                State::Dead => CoStatus::Dead,
            },
        }
    }
}
